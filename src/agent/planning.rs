//! Planning: revise the plan and pick the next step.
//!
//! Memories are retrieved under the planning weight profile, the model is
//! asked for `{rationale, plan, next_step}`, and the controller's plan
//! state is overwritten on success. A response that fails to parse keeps
//! the previous plan untouched.

use serde::Deserialize;

use crate::agent::{format_memories, AgentController};
use crate::memory::{MemoryKind, MemoryRecord};
use crate::parse;
use crate::persona::Persona;

const PLANNING_MEMORY_LIMIT: usize = 10;

/// What planning left the controller with after one pass. `revised` is
/// false when the previous plan was retained (parse or provider failure).
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub rationale: String,
    pub plan: String,
    pub next_step: String,
    pub revised: bool,
}

#[derive(Debug, Deserialize)]
struct PlanLlmResponse {
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    plan: Option<String>,
    #[serde(default)]
    next_step: Option<String>,
}

impl AgentController {
    /// Create or update the plan. Never errors; failure keeps the previous
    /// plan and next step.
    pub async fn plan(&mut self) -> PlanOutcome {
        let query = format!(
            "Current situation and how to accomplish: {}",
            self.intent
        );
        let memories = match self
            .memory
            .retrieve(&query, None, PLANNING_MEMORY_LIMIT, &self.weights.planning)
            .await
        {
            Ok(memories) => memories,
            Err(error) => {
                tracing::warn!("Planning retrieval failed: {}", error);
                Vec::new()
            }
        };

        let prompt =
            build_planning_prompt(&self.persona, &self.intent, &memories, &self.current_plan);
        let response = match self.llm.generate(&prompt, self.temperature).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Planning model call failed: {}", error);
                return self.retained_plan();
            }
        };

        let parsed = match parse::parse_json::<PlanLlmResponse>(&response) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!("Failed to parse planning response: {}", error);
                return self.retained_plan();
            }
        };

        if let Some(plan) = parsed.plan {
            self.current_plan = plan;
        }
        if let Some(next_step) = parsed.next_step {
            self.next_step = next_step;
        }

        let content = format!(
            "Plan: {}\nNext step: {}",
            self.current_plan, self.next_step
        );
        if let Err(error) = self
            .memory
            .append(MemoryKind::PlanStep, &content, "planning", Some(8.0))
            .await
        {
            tracing::warn!("Failed to store plan step: {}", error);
        }

        PlanOutcome {
            rationale: parsed.rationale.unwrap_or_default(),
            plan: self.current_plan.clone(),
            next_step: self.next_step.clone(),
            revised: true,
        }
    }

    fn retained_plan(&self) -> PlanOutcome {
        PlanOutcome {
            rationale: String::new(),
            plan: self.current_plan.clone(),
            next_step: self.next_step.clone(),
            revised: false,
        }
    }
}

pub(crate) fn build_planning_prompt(
    persona: &Persona,
    intent: &str,
    memories: &[MemoryRecord],
    previous_plan: &str,
) -> String {
    format!(
        "You are tasked with creating/updating a detailed plan for a web browsing \
         agent with the following persona:\n{}\n\n\
         INTENT:\n{}\n\n\
         RELEVANT MEMORIES:\n{}\n\n\
         PREVIOUS PLAN (if any):\n{}\n\n\
         Based on the persona, intent, and memories, create or update a plan to \
         accomplish the goal. Think step by step about the most effective way to \
         navigate the website and complete the task. Be specific about what \
         actions to take next.\n\n\
         Output as a JSON object with the following structure:\n\
         {{\n\
           \"rationale\": \"Explain why this plan makes sense given the current situation\",\n\
           \"plan\": \"Step 1: ...\\nStep 2: ...\\nStep 3: ...\",\n\
           \"next_step\": \"The specific next step that should be executed now (just one action)\"\n\
         }}\n\n\
         Your output MUST be valid JSON.",
        persona.format_for_prompt(),
        intent,
        format_memories(memories),
        previous_plan
    )
}
