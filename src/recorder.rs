//! Session trace recording and replay.
//!
//! While a session runs, every executed action is appended to an ordered
//! trace. The persisted form is a JSON array of flattened action records
//! (`{"type": ..., "target"/"name"/"value": ..., "description": ...,
//! "timestamp": ...}`) that round-trips through save/load without loss and
//! can be replayed against any [`EnvironmentAdapter`].

use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::browser::{Action, ActionOutcome, EnvironmentAdapter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    #[serde(flatten)]
    pub action: Action,
    /// Seconds since epoch at execution time.
    pub timestamp: f64,
    /// Base64-encoded screenshot taken right after the action, when the
    /// adapter provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionRecorder {
    recording: bool,
    simulation_id: Option<String>,
    trace: Vec<TraceEntry>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, simulation_id: Option<String>) {
        self.recording = true;
        self.trace.clear();
        self.simulation_id = simulation_id.clone();
        tracing::info!(
            "Started recording simulation session {}",
            simulation_id.as_deref().unwrap_or("<unnamed>")
        );
    }

    pub fn stop(&mut self) -> &[TraceEntry] {
        self.recording = false;
        tracing::info!("Stopped recording. Recorded {} actions", self.trace.len());
        &self.trace
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Append an executed action. No-op unless recording.
    pub fn record(&mut self, action: Action, screenshot: Option<&[u8]>) {
        if !self.recording {
            return;
        }
        self.trace.push(TraceEntry {
            action,
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            screenshot: screenshot
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        });
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.trace).context("Failed to serialize trace")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write trace to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Vec<TraceEntry>> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace from {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse trace file")
    }
}

/// Re-run a recorded trace through an adapter, pausing `delay_secs` between
/// actions. Stops at the first adapter error; individual action failures
/// are collected, not fatal.
pub async fn replay(
    trace: &[TraceEntry],
    adapter: &dyn EnvironmentAdapter,
    delay_secs: f64,
) -> Result<Vec<ActionOutcome>> {
    let mut outcomes = Vec::with_capacity(trace.len());
    for entry in trace {
        let outcome = adapter.execute(&entry.action).await?;
        if !outcome.success {
            tracing::warn!("Replay action failed: {}", outcome.message);
        }
        outcomes.push(outcome);
        if delay_secs > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay_secs)).await;
        }
    }
    Ok(outcomes)
}
