//! Slow loop: reflection and wonder.
//!
//! Reflection distills recent observations, actions, and plan steps into a
//! handful of higher-level insights; wonder produces the stray thoughts a
//! real user would have. Both run on recent-memory digests rather than
//! weighted retrieval, use the shared parsing contract, and never error.

use crate::agent::{format_memories, AgentController};
use crate::memory::{MemoryKind, MemoryRecord};
use crate::parse;
use crate::persona::Persona;

impl AgentController {
    /// Generate 3-5 insight memories from the recent past.
    pub async fn reflect(&mut self) -> Vec<String> {
        let recent = self.recent_by_kinds(
            &[
                MemoryKind::Observation,
                MemoryKind::ActionTaken,
                MemoryKind::PlanStep,
            ],
            10,
            15,
        );

        let prompt = build_reflection_prompt(&self.persona, &self.intent, &recent);
        let response = match self.llm.generate(&prompt, self.temperature).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Reflection model call failed: {}", error);
                return Vec::new();
            }
        };

        let extracted = parse::extract_string_list(&response, "insights");
        if extracted.used_fallback() {
            tracing::warn!(
                "Reflection response was not clean JSON; salvaged {} list items",
                extracted.value.len()
            );
        }

        for insight in &extracted.value {
            if let Err(error) = self
                .memory
                .append(MemoryKind::Reflection, insight, "reflection", Some(7.0))
                .await
            {
                tracing::warn!("Failed to store reflection: {}", error);
            }
        }

        extracted.value
    }

    /// Generate 2-3 curiosity memories from the recent past.
    pub async fn wonder(&mut self) -> Vec<String> {
        let recent = self.recent_by_kinds(
            &[
                MemoryKind::Observation,
                MemoryKind::Reflection,
                MemoryKind::ActionTaken,
            ],
            5,
            10,
        );

        let prompt = build_wonder_prompt(&self.persona, &self.intent, &recent);
        let response = match self.llm.generate(&prompt, self.temperature).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Wonder model call failed: {}", error);
                return Vec::new();
            }
        };

        let extracted = parse::extract_string_list(&response, "thoughts");
        if extracted.used_fallback() {
            tracing::warn!(
                "Wonder response was not clean JSON; salvaged {} list items",
                extracted.value.len()
            );
        }

        for thought in &extracted.value {
            if let Err(error) = self
                .memory
                .append(MemoryKind::Wonder, thought, "wonder", Some(4.0))
                .await
            {
                tracing::warn!("Failed to store wondering: {}", error);
            }
        }

        extracted.value
    }
}

pub(crate) fn build_reflection_prompt(
    persona: &Persona,
    intent: &str,
    recent: &[MemoryRecord],
) -> String {
    format!(
        "You are the REFLECTION module of a web browsing agent. Your job is to \
         generate high-level insights and reflections based on recent memories \
         and the agent's persona.\n\n\
         PERSONA:\n{}\n\n\
         INTENT:\n{}\n\n\
         RECENT MEMORIES:\n{}\n\n\
         Based on these memories and the persona, generate 3-5 thoughtful \
         reflections or insights about the experience so far. These should be \
         higher-level thoughts that connect observations and actions to the \
         persona's characteristics and goals.\n\n\
         Examples:\n\
         - \"I'm finding this site's navigation confusing since there are too many \
         options, which is frustrating given my limited technical experience.\"\n\
         - \"The product descriptions are very detailed, which I appreciate as \
         someone who likes to make informed decisions.\"\n\n\
         Output as a JSON object:\n\
         {{\n\
           \"insights\": [\n\
             \"reflection 1\",\n\
             \"reflection 2\",\n\
             \"reflection 3\"\n\
           ]\n\
         }}\n\n\
         Your output MUST be valid JSON.",
        persona.format_for_prompt(),
        intent,
        format_memories(recent)
    )
}

pub(crate) fn build_wonder_prompt(
    persona: &Persona,
    intent: &str,
    recent: &[MemoryRecord],
) -> String {
    format!(
        "You are the WONDER module of a web browsing agent. Your job is to \
         generate random thoughts, curiosities, and questions that might cross \
         the persona's mind.\n\n\
         PERSONA:\n{}\n\n\
         INTENT:\n{}\n\n\
         RECENT MEMORIES:\n{}\n\n\
         Based on these memories and the persona, generate 2-3 random thoughts or \
         questions that might naturally occur to this persona. These should feel \
         natural and reflect the persona's characteristics, preferences, and \
         curiosities.\n\n\
         Examples:\n\
         - \"I wonder if they offer free shipping for orders over a certain amount?\"\n\
         - \"Would the blue color option match my living room better than the gray one?\"\n\n\
         Output as a JSON object:\n\
         {{\n\
           \"thoughts\": [\n\
             \"thought 1\",\n\
             \"thought 2\"\n\
           ]\n\
         }}\n\n\
         Your output MUST be valid JSON.",
        persona.format_for_prompt(),
        intent,
        format_memories(recent)
    )
}
