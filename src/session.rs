//! Session driver.
//!
//! Runs the fast loop up to `max_cycles` times with the slow loop folded in
//! every third cycle, watches for completion and failure streaks, and
//! always closes with one final reflect/wonder pass. The completion check
//! is a strategy seam: the default keyword heuristic is known to be weak,
//! and swapping it out must not touch the controller or driver logic.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentController, SessionEvent};
use crate::memory::{MemoryKind, MemoryRecord, MemoryStream};

/// Slow loop runs on every cycle divisible by this (except cycle 0).
pub const SLOW_LOOP_INTERVAL: usize = 3;

/// How many trailing actions the failure-streak check inspects, and how
/// many of them must have failed to end the session.
const FAILURE_WINDOW: usize = 3;
const FAILURE_THRESHOLD: usize = 2;

/// Decides whether the goal has been accomplished, from memory alone.
pub trait CompletionStrategy: Send + Sync {
    fn is_task_complete(&self, memory: &MemoryStream) -> bool;
}

/// Default heuristic: any reflection mentioning both "completed" and
/// "task" (case-insensitive) marks the task complete. Known to both
/// under- and over-trigger; lives behind the trait so an LLM-judged
/// check can replace it without touching the driver.
pub struct ReflectionKeywordCompletion;

impl CompletionStrategy for ReflectionKeywordCompletion {
    fn is_task_complete(&self, memory: &MemoryStream) -> bool {
        memory.by_kind(MemoryKind::Reflection).iter().any(|record| {
            let content = record.content.to_lowercase();
            content.contains("completed") && content.contains("task")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub final_url: String,
    pub cycles_completed: usize,
    pub task_completed: bool,
    pub memories: Vec<MemoryRecord>,
    pub reflections: Vec<String>,
    pub wonderings: Vec<String>,
}

pub struct SessionDriver {
    controller: AgentController,
    completion: Box<dyn CompletionStrategy>,
    event_tx: Option<flume::Sender<SessionEvent>>,
}

impl SessionDriver {
    pub fn new(controller: AgentController) -> Self {
        Self {
            controller,
            completion: Box::new(ReflectionKeywordCompletion),
            event_tx: None,
        }
    }

    pub fn with_completion_strategy(mut self, strategy: Box<dyn CompletionStrategy>) -> Self {
        self.completion = strategy;
        self
    }

    pub fn with_event_sender(mut self, event_tx: flume::Sender<SessionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn controller(&self) -> &AgentController {
        &self.controller
    }

    pub fn into_controller(self) -> AgentController {
        self.controller
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Run a full session. Requires persona and intent to be set on the
    /// controller; that precondition is the only hard error. Everything
    /// else degrades per step and at worst trips the failure-streak check.
    pub async fn run(&mut self, start_url: &str, max_cycles: usize) -> Result<SessionResult> {
        self.controller.start_session(start_url).await?;

        let mut cycles_completed = 0;
        for cycle in 0..max_cycles {
            self.emit(SessionEvent::CycleStarted { cycle });
            tracing::info!("Running cycle {}/{}", cycle + 1, max_cycles);

            let report = self.controller.run_fast_cycle().await;
            cycles_completed = cycle + 1;
            self.emit(SessionEvent::ObservationsAdded {
                count: report.observations.len(),
            });
            self.emit(SessionEvent::PlanUpdated {
                next_step: report.next_step.clone(),
            });
            self.emit(SessionEvent::ActionExecuted {
                description: report.outcome.message.clone(),
                success: report.outcome.success,
            });

            if cycle > 0 && cycle % SLOW_LOOP_INTERVAL == 0 {
                let (reflections, wonderings) = self.controller.run_slow_loop().await;
                self.emit(SessionEvent::ReflectionsAdded {
                    count: reflections.len(),
                });
                self.emit(SessionEvent::WonderingsAdded {
                    count: wonderings.len(),
                });
            }

            if self.completion.is_task_complete(self.controller.memory()) {
                tracing::info!("Task detected as complete after cycle {}", cycle + 1);
                break;
            }
            if failure_streak(self.controller.memory()) {
                tracing::info!("Terminating session due to repeated action failures");
                break;
            }
        }

        // Closing slow-loop pass, whether the loop broke early or ran dry.
        let reflections = self.controller.reflect().await;
        let wonderings = self.controller.wonder().await;

        let task_completed = self.completion.is_task_complete(self.controller.memory());
        self.emit(SessionEvent::SessionFinished {
            cycles_completed,
            task_completed,
        });

        Ok(SessionResult {
            final_url: self.controller.current_url().await,
            cycles_completed,
            task_completed,
            memories: self.controller.memory().all().to_vec(),
            reflections,
            wonderings,
        })
    }
}

/// True when at least `FAILURE_THRESHOLD` of the last `FAILURE_WINDOW`
/// action records carry a failure marker.
fn failure_streak(memory: &MemoryStream) -> bool {
    let mut actions = memory.by_kind(MemoryKind::ActionTaken);
    if actions.len() < FAILURE_WINDOW {
        return false;
    }
    actions.sort_by(|a, b| {
        b.timestamp
            .partial_cmp(&a.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let failures = actions
        .iter()
        .take(FAILURE_WINDOW)
        .filter(|record| record.content.to_lowercase().contains("failed"))
        .count();
    failures >= FAILURE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::ScriptedLlm;
    use crate::browser::{PageElement, PageSnapshot, ScriptedBrowser, SiteFixture};
    use crate::embedding::HashingEmbedder;
    use crate::llm_client::LanguageModel;
    use crate::persona::{Persona, PersonaValue};
    use std::sync::Arc;

    fn shop_fixture() -> SiteFixture {
        SiteFixture {
            pages: vec![PageSnapshot {
                url: "https://shop.test/".to_string(),
                title: "Shop".to_string(),
                clickables: vec![PageElement {
                    name: "sweaters_link".to_string(),
                    description: "Browse sweaters".to_string(),
                }],
                inputs: vec![PageElement {
                    name: "search_input".to_string(),
                    description: "Search the catalog".to_string(),
                }],
                text_blocks: Vec::new(),
            }],
            links: Vec::new(),
        }
    }

    async fn seeded_driver(llm: Arc<dyn LanguageModel>) -> SessionDriver {
        let browser = Arc::new(ScriptedBrowser::new(shop_fixture()));
        let memory = MemoryStream::new(Arc::new(HashingEmbedder::default()));
        let mut controller = AgentController::new(llm, browser, memory);
        let mut persona = Persona::default();
        persona.insert("name", PersonaValue::One("Dana".to_string()));
        controller.set_persona(persona).await.unwrap();
        controller.set_intent("buy a red sweater").await.unwrap();
        SessionDriver::new(controller)
    }

    const OBS: &str = r#"{"observations": ["a search input is available"]}"#;
    const PLAN: &str =
        r#"{"rationale": "r", "plan": "Step 1: search", "next_step": "search for sweater"}"#;
    const ACT: &str = r#"{"actions": [{"type": "input", "name": "search_input", "value": "red sweater", "description": "search"}]}"#;
    const REFLECT: &str = r#"{"insights": ["Searching felt easy"]}"#;
    const REFLECT_DONE: &str = r#"{"insights": ["I have completed the task of buying the sweater"]}"#;
    const WONDER: &str = r#"{"thoughts": ["I wonder about shipping costs"]}"#;

    #[tokio::test]
    async fn run_requires_persona_and_intent() {
        let browser = Arc::new(ScriptedBrowser::new(shop_fixture()));
        let memory = MemoryStream::new(Arc::new(HashingEmbedder::default()));
        let controller = AgentController::new(
            Arc::new(ScriptedLlm::new(Vec::<String>::new())),
            browser,
            memory,
        );
        let mut driver = SessionDriver::new(controller);
        assert!(driver.run("https://shop.test/", 2).await.is_err());
    }

    #[tokio::test]
    async fn three_cycles_produce_reflections_and_wonderings() {
        let mut responses = Vec::new();
        for _ in 0..3 {
            responses.extend([OBS, PLAN, ACT]);
        }
        responses.extend([REFLECT, WONDER]);
        let mut driver = seeded_driver(Arc::new(ScriptedLlm::new(responses))).await;

        let result = driver.run("https://shop.test/", 3).await.unwrap();
        assert_eq!(result.cycles_completed, 3);
        assert!(!result.reflections.is_empty());
        assert!(!result.wonderings.is_empty());

        let memory = driver.controller().memory();
        assert!(!memory.by_kind(MemoryKind::Reflection).is_empty());
        assert!(!memory.by_kind(MemoryKind::Wonder).is_empty());
    }

    #[tokio::test]
    async fn completion_reflection_ends_a_single_cycle_session() {
        let responses = vec![OBS, PLAN, ACT, REFLECT_DONE, WONDER];
        let mut driver = seeded_driver(Arc::new(ScriptedLlm::new(responses))).await;

        let result = driver.run("https://shop.test/", 1).await.unwrap();
        assert_eq!(result.cycles_completed, 1);
        assert!(result.task_completed);
    }

    #[tokio::test]
    async fn failure_streak_terminates_early() {
        // Every action targets a nonexistent element, so each cycle logs an
        // attempt plus a failure record; two cycles in, three of the last
        // three action records mention a failure.
        let bad_act = r#"{"actions": [{"type": "click", "name": "ghost_button", "description": "click"}]}"#;
        let mut responses = Vec::new();
        for _ in 0..10 {
            responses.extend([OBS, PLAN, bad_act]);
        }
        responses.extend([REFLECT, WONDER]);
        let mut driver = seeded_driver(Arc::new(ScriptedLlm::new(responses))).await;

        let result = driver.run("https://shop.test/", 10).await.unwrap();
        assert!(result.cycles_completed < 10);
        assert!(!result.task_completed);
    }

    #[tokio::test]
    async fn session_events_cover_the_whole_run() {
        let responses = vec![OBS, PLAN, ACT, REFLECT, WONDER];
        let (tx, rx) = flume::unbounded();
        let mut driver = seeded_driver(Arc::new(ScriptedLlm::new(responses))).await;
        driver = driver.with_event_sender(tx);

        driver.run("https://shop.test/", 1).await.unwrap();

        let events: Vec<SessionEvent> = rx.drain().collect();
        assert!(matches!(events.first(), Some(SessionEvent::CycleStarted { cycle: 0 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::ActionExecuted { success: true, .. })));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionFinished { .. })
        ));
    }

    #[tokio::test]
    async fn result_carries_the_full_ledger() {
        let responses = vec![OBS, PLAN, ACT, REFLECT, WONDER];
        let mut driver = seeded_driver(Arc::new(ScriptedLlm::new(responses))).await;
        let result = driver.run("https://shop.test/", 1).await.unwrap();

        assert_eq!(result.final_url, "https://shop.test/");
        // persona detail + intent + initial navigation + observation + plan
        // step + action + closing reflection + closing wonder
        assert!(result.memories.len() >= 8);
        assert!(result
            .memories
            .iter()
            .any(|m| m.kind == MemoryKind::Intent));
    }

    #[tokio::test]
    async fn keyword_completion_is_case_insensitive() {
        let strategy = ReflectionKeywordCompletion;
        let mut memory = MemoryStream::new(Arc::new(HashingEmbedder::default()));
        assert!(!strategy.is_task_complete(&memory));

        memory
            .append(
                MemoryKind::Reflection,
                "I feel good about the Task being Completed now",
                "reflection",
                Some(7.0),
            )
            .await
            .unwrap();
        assert!(strategy.is_task_complete(&memory));

        // Wonderings with the same words do not count.
        let mut other = MemoryStream::new(Arc::new(HashingEmbedder::default()));
        other
            .append(
                MemoryKind::Wonder,
                "I wonder if the task can be completed quickly",
                "wonder",
                Some(4.0),
            )
            .await
            .unwrap();
        assert!(!strategy.is_task_complete(&other));
    }
}
