//! The agent controller.
//!
//! One controller owns one session's memory stream, persona, intent, and
//! plan state, and orchestrates the two loops over it:
//!
//! - fast loop, every cycle: perceive -> plan -> act
//! - slow loop, periodically: reflect -> wonder
//!
//! Each sub-step feeds the next, so a cycle is strictly sequential. Model
//! and adapter failures degrade the affected step to "no output" rather
//! than aborting the session; only missing persona/intent preconditions are
//! hard errors.

pub mod action;
pub mod perception;
pub mod planning;
pub mod reflection;

use std::sync::Arc;

use anyhow::Result;
use chrono::DateTime;

use crate::browser::{Action, ActionOutcome, EnvironmentAdapter};
use crate::llm_client::LanguageModel;
use crate::memory::{MemoryKind, MemoryRecord, MemoryStream, RetrievalWeights};
use crate::persona::Persona;
use crate::recorder::SessionRecorder;

/// Progress notifications for whoever is watching a session run.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    CycleStarted {
        cycle: usize,
    },
    ObservationsAdded {
        count: usize,
    },
    PlanUpdated {
        next_step: String,
    },
    ActionExecuted {
        description: String,
        success: bool,
    },
    ReflectionsAdded {
        count: usize,
    },
    WonderingsAdded {
        count: usize,
    },
    SessionFinished {
        cycles_completed: usize,
        task_completed: bool,
    },
}

/// Retrieval weight profiles, one per fast-loop module.
#[derive(Debug, Clone)]
pub struct ModuleWeights {
    pub perception: RetrievalWeights,
    pub planning: RetrievalWeights,
    pub action: RetrievalWeights,
}

impl Default for ModuleWeights {
    fn default() -> Self {
        Self {
            perception: RetrievalWeights::perception(),
            planning: RetrievalWeights::planning(),
            action: RetrievalWeights::action(),
        }
    }
}

/// What one fast-loop cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub observations: Vec<String>,
    pub next_step: String,
    pub outcome: ActionOutcome,
}

pub struct AgentController {
    llm: Arc<dyn LanguageModel>,
    browser: Arc<dyn EnvironmentAdapter>,
    memory: MemoryStream,
    persona: Persona,
    intent: String,
    current_plan: String,
    next_step: String,
    weights: ModuleWeights,
    temperature: f32,
    recorder: Option<SessionRecorder>,
}

impl AgentController {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        browser: Arc<dyn EnvironmentAdapter>,
        memory: MemoryStream,
    ) -> Self {
        Self {
            llm,
            browser,
            memory,
            persona: Persona::default(),
            intent: String::new(),
            current_plan: String::new(),
            next_step: String::new(),
            weights: ModuleWeights::default(),
            temperature: 0.7,
            recorder: None,
        }
    }

    pub fn with_weights(mut self, weights: ModuleWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn memory(&self) -> &MemoryStream {
        &self.memory
    }

    pub fn into_memory(self) -> MemoryStream {
        self.memory
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn current_plan(&self) -> &str {
        &self.current_plan
    }

    pub fn next_step(&self) -> &str {
        &self.next_step
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub async fn current_url(&self) -> String {
        self.browser.current_url().await
    }

    /// Adopt a persona, seeding one persona_detail memory per text
    /// attribute value.
    pub async fn set_persona(&mut self, persona: Persona) -> Result<()> {
        for detail in persona.detail_contents() {
            self.memory
                .append(MemoryKind::PersonaDetail, &detail, "persona", Some(8.0))
                .await?;
        }
        self.persona = persona;
        Ok(())
    }

    /// Set the session goal, recorded as the highest-salience memory.
    pub async fn set_intent(&mut self, intent: &str) -> Result<()> {
        self.intent = intent.to_string();
        self.memory
            .append(
                MemoryKind::Intent,
                &format!("My goal is to: {}", intent),
                "intent",
                Some(10.0),
            )
            .await?;
        Ok(())
    }

    /// Navigate to the starting URL. Persona and intent must be set first;
    /// that is the one precondition that fails hard.
    pub async fn start_session(&mut self, url: &str) -> Result<ActionOutcome> {
        if self.persona.is_empty() {
            anyhow::bail!("Persona must be set before starting a session");
        }
        if self.intent.is_empty() {
            anyhow::bail!("Intent must be set before starting a session");
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.start(None);
        }

        let navigate = Action::navigate(url);
        let outcome = match self.browser.execute(&navigate).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!("Initial navigation failed: {}", error);
                ActionOutcome::failed(format!("Navigation error: {}", error))
            }
        };

        self.memory
            .append(
                MemoryKind::ActionTaken,
                &format!("Navigated to {}", url),
                "session",
                Some(7.0),
            )
            .await?;
        self.record_action(&navigate).await;

        Ok(outcome)
    }

    /// One fast-loop cycle: perceive -> plan -> act.
    pub async fn run_fast_cycle(&mut self) -> CycleReport {
        let observations = self.perceive().await;
        let plan = self.plan().await;
        let outcome = self.act().await;
        CycleReport {
            observations,
            next_step: plan.next_step,
            outcome,
        }
    }

    /// One slow-loop pass: reflect, then wonder.
    pub async fn run_slow_loop(&mut self) -> (Vec<String>, Vec<String>) {
        let reflections = self.reflect().await;
        let wonderings = self.wonder().await;
        (reflections, wonderings)
    }

    pub(crate) async fn record_action(&mut self, action: &Action) {
        if self.recorder.is_none() {
            return;
        }
        let screenshot = match self.browser.screenshot().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::debug!("Screenshot unavailable: {}", error);
                None
            }
        };
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(action.clone(), screenshot.as_deref());
        }
    }

    /// The `per_kind` newest records of each kind, merged, newest first,
    /// capped at `total`. Both slow-loop modules build their context this
    /// way.
    pub(crate) fn recent_by_kinds(
        &self,
        kinds: &[MemoryKind],
        per_kind: usize,
        total: usize,
    ) -> Vec<MemoryRecord> {
        let mut merged = Vec::new();
        for &kind in kinds {
            let mut records = self.memory.by_kind(kind);
            records.sort_by(|a, b| {
                b.timestamp
                    .partial_cmp(&a.timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            records.truncate(per_kind);
            merged.extend(records);
        }
        merged.sort_by(|a, b| {
            b.timestamp
                .partial_cmp(&a.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(total);
        merged
    }
}

/// Format memories for prompt inclusion, newest first:
/// `[HH:MM:SS | kind] content`.
pub(crate) fn format_memories(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        return "No relevant memories".to_string();
    }
    let mut sorted: Vec<&MemoryRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        b.timestamp
            .partial_cmp(&a.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
        .iter()
        .map(|record| {
            format!(
                "[{} | {}] {}",
                format_clock(record.timestamp),
                record.kind.as_str(),
                record.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_clock(timestamp: f64) -> String {
    let secs = timestamp as i64;
    let nanos = ((timestamp - secs as f64) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "00:00:00".to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::llm_client::LanguageModel;

    /// Replays canned completions in order; repeats the last one when the
    /// script runs out.
    pub struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
        last: Mutex<String>,
    }

    impl ScriptedLlm {
        pub fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
                last: Mutex::new("{}".to_string()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            let mut queue = self.responses.lock().unwrap();
            match queue.pop_front() {
                Some(response) => {
                    *self.last.lock().unwrap() = response.clone();
                    Ok(response)
                }
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    /// Always errors, for provider-failure paths.
    pub struct FailingLlm;

    #[async_trait]
    impl LanguageModel for FailingLlm {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            anyhow::bail!("model endpoint unreachable")
        }
    }
}
