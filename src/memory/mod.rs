//! Append-only memory stream.
//!
//! Every piece of agent state worth remembering lands here as an immutable,
//! embedded, timestamped record. Retrieval combines importance, relevance
//! (cosine similarity against a query embedding), and recency (exponential
//! decay, ~1 hour half-life), with a per-kind multiplier applied last.
//! Records are never mutated or deleted; the ledger only grows, so a saved
//! stream replays and audits exactly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, EmbeddingProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Observation,
    ActionTaken,
    PlanStep,
    Reflection,
    Wonder,
    PersonaDetail,
    Intent,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::Observation => "observation",
            MemoryKind::ActionTaken => "action_taken",
            MemoryKind::PlanStep => "plan_step",
            MemoryKind::Reflection => "reflection",
            MemoryKind::Wonder => "wonder",
            MemoryKind::PersonaDetail => "persona_detail",
            MemoryKind::Intent => "intent",
        }
    }
}

/// One immutable fact in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub kind: MemoryKind,
    pub content: String,
    /// Seconds since epoch, strictly increasing within a stream.
    pub timestamp: f64,
    pub source: String,
    /// Computed once at creation, reused verbatim across save/load.
    pub embedding: Vec<f32>,
    /// Salience in [1, 10].
    pub importance: f64,
    #[serde(default)]
    pub related_ids: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub const DEFAULT_IMPORTANCE: f64 = 5.0;

/// Recency decay: 1.0 at zero age, e^-1 after one hour. Clock skew into the
/// future counts as zero age.
pub fn recency_score(delta_secs: f64) -> f64 {
    (-delta_secs.max(0.0) / 3600.0).exp()
}

/// Weight profile for one retrieval. Kinds absent from `kind_weights`
/// multiply by 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalWeights {
    pub importance: f64,
    pub relevance: f64,
    pub recency: f64,
    #[serde(default)]
    pub kind_weights: HashMap<MemoryKind, f64>,
}

impl RetrievalWeights {
    pub fn kind_weight(&self, kind: MemoryKind) -> f64 {
        self.kind_weights.get(&kind).copied().unwrap_or(1.0)
    }

    /// Perception favors fresh observations and the standing intent.
    pub fn perception() -> Self {
        Self {
            importance: 0.3,
            relevance: 0.4,
            recency: 0.3,
            kind_weights: HashMap::from([
                (MemoryKind::Observation, 1.2),
                (MemoryKind::ActionTaken, 1.0),
                (MemoryKind::PlanStep, 0.8),
                (MemoryKind::Reflection, 0.7),
                (MemoryKind::Wonder, 0.5),
                (MemoryKind::PersonaDetail, 1.0),
                (MemoryKind::Intent, 1.5),
            ]),
        }
    }

    /// Planning leans on prior plan steps and action history.
    pub fn planning() -> Self {
        Self {
            importance: 0.3,
            relevance: 0.5,
            recency: 0.2,
            kind_weights: HashMap::from([
                (MemoryKind::Observation, 1.0),
                (MemoryKind::ActionTaken, 1.2),
                (MemoryKind::PlanStep, 1.5),
                (MemoryKind::Reflection, 0.8),
                (MemoryKind::Wonder, 0.3),
                (MemoryKind::PersonaDetail, 0.7),
                (MemoryKind::Intent, 1.4),
            ]),
        }
    }

    /// Action selection cares most about the current plan step.
    pub fn action() -> Self {
        Self {
            importance: 0.35,
            relevance: 0.45,
            recency: 0.2,
            kind_weights: HashMap::from([
                (MemoryKind::Observation, 0.9),
                (MemoryKind::ActionTaken, 0.7),
                (MemoryKind::PlanStep, 1.5),
                (MemoryKind::Reflection, 0.5),
                (MemoryKind::Wonder, 0.3),
                (MemoryKind::PersonaDetail, 0.6),
                (MemoryKind::Intent, 1.3),
            ]),
        }
    }
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            importance: 0.3,
            relevance: 0.4,
            recency: 0.3,
            kind_weights: HashMap::from([
                (MemoryKind::Observation, 1.0),
                (MemoryKind::ActionTaken, 1.0),
                (MemoryKind::PlanStep, 1.0),
                (MemoryKind::Reflection, 1.0),
                (MemoryKind::Wonder, 0.7),
                (MemoryKind::PersonaDetail, 1.2),
                (MemoryKind::Intent, 1.5),
            ]),
        }
    }
}

pub struct MemoryStream {
    records: Vec<MemoryRecord>,
    embedder: Arc<dyn EmbeddingProvider>,
    last_timestamp: f64,
}

impl MemoryStream {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            records: Vec::new(),
            embedder,
            last_timestamp: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record with default linkage and no metadata.
    pub async fn append(
        &mut self,
        kind: MemoryKind,
        content: &str,
        source: &str,
        importance: Option<f64>,
    ) -> Result<String> {
        self.append_full(kind, content, source, importance, Vec::new(), serde_json::Value::Null)
            .await
    }

    /// Append a record. The embedding is computed here, once; if the
    /// provider fails, nothing is stored and the error propagates.
    pub async fn append_full(
        &mut self,
        kind: MemoryKind,
        content: &str,
        source: &str,
        importance: Option<f64>,
        related_ids: Vec<String>,
        metadata: serde_json::Value,
    ) -> Result<String> {
        let embedding = self
            .embedder
            .embed(content)
            .await
            .with_context(|| format!("Failed to embed {} memory", kind.as_str()))?;

        let id = uuid::Uuid::new_v4().to_string();
        // The wall clock can stand still between appends; keep timestamps
        // strictly increasing so recency ordering is total.
        let mut timestamp = now_timestamp();
        if timestamp <= self.last_timestamp {
            timestamp = self.last_timestamp + 1e-6;
        }
        self.last_timestamp = timestamp;

        self.records.push(MemoryRecord {
            id: id.clone(),
            kind,
            content: content.to_string(),
            timestamp,
            source: source.to_string(),
            embedding,
            importance: importance.unwrap_or(DEFAULT_IMPORTANCE).clamp(1.0, 10.0),
            related_ids,
            metadata,
        });
        Ok(id)
    }

    /// Retrieve the top `limit` records for a query under the given weight
    /// profile. Deterministic for a fixed store, query, weights, and `now`;
    /// ties keep insertion order. An empty store short-circuits to an empty
    /// list without touching the embedding provider.
    pub async fn retrieve(
        &self,
        query: &str,
        now: Option<f64>,
        limit: usize,
        weights: &RetrievalWeights,
    ) -> Result<Vec<MemoryRecord>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }

        let now = now.unwrap_or_else(now_timestamp);
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed retrieval query")?;

        let mut scored: Vec<(f64, &MemoryRecord)> = self
            .records
            .iter()
            .map(|record| {
                let relevance = cosine_similarity(&query_embedding, &record.embedding);
                let recency = recency_score(now - record.timestamp);
                let base = (record.importance / 10.0) * weights.importance
                    + relevance * weights.relevance
                    + recency * weights.recency;
                (base * weights.kind_weight(record.kind), record)
            })
            .collect();

        // Stable sort: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    /// All records of one kind, in insertion order.
    pub fn by_kind(&self, kind: MemoryKind) -> Vec<MemoryRecord> {
        self.records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// The `count` most recent records, newest first.
    pub fn recent(&self, count: usize) -> Vec<MemoryRecord> {
        let mut sorted: Vec<MemoryRecord> = self.records.clone();
        sorted.sort_by(|a, b| {
            b.timestamp
                .partial_cmp(&a.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted.truncate(count);
        sorted
    }

    /// The full ledger in insertion order.
    pub fn all(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Serialize every record, embeddings included, as a JSON array.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)
            .context("Failed to serialize memory stream")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write memory stream to {}", path.display()))?;
        Ok(())
    }

    /// Rebuild a stream from `save` output. Stored embeddings are reused
    /// verbatim, so retrieval scores match the pre-save stream exactly.
    /// A missing file yields an empty stream.
    pub fn load(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(embedder));
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read memory stream from {}", path.display()))?;
        let records: Vec<MemoryRecord> =
            serde_json::from_str(&json).context("Failed to parse memory stream file")?;
        let last_timestamp = records.iter().map(|r| r.timestamp).fold(0.0, f64::max);
        Ok(Self {
            records,
            embedder,
            last_timestamp,
        })
    }
}

fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
