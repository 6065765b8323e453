//! Perception: turn the current page into observation memories.
//!
//! The page snapshot, persona, and intent go into one prompt; the model
//! returns a JSON list of observation strings. Each observation is scored
//! for importance by keyword overlap with the intent (plus a bonus for
//! naming UI machinery) and appended to the memory stream.

use crate::agent::AgentController;
use crate::browser::{PageSnapshot, TextBlock};
use crate::memory::MemoryKind;
use crate::parse;
use crate::persona::Persona;

const UI_KEYWORDS: [&str; 8] = [
    "button",
    "link",
    "menu",
    "search",
    "input",
    "form",
    "error",
    "navigation",
];

impl AgentController {
    /// Observe the current page. Provider failures degrade to an empty
    /// observation list; nothing here errors out of the cycle.
    pub async fn perceive(&mut self) -> Vec<String> {
        let snapshot = match self.browser.observe_page().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!("Perception could not observe the page: {}", error);
                return Vec::new();
            }
        };

        let prompt = build_perception_prompt(&snapshot, &self.persona, &self.intent);
        let response = match self.llm.generate(&prompt, self.temperature).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Perception model call failed: {}", error);
                return Vec::new();
            }
        };

        let extracted = parse::extract_string_list(&response, "observations");
        if extracted.used_fallback() {
            tracing::warn!(
                "Perception response was not clean JSON; salvaged {} list items",
                extracted.value.len()
            );
        }

        for observation in &extracted.value {
            let importance = score_observation_importance(observation, &self.intent);
            if let Err(error) = self
                .memory
                .append(
                    MemoryKind::Observation,
                    observation,
                    "perception",
                    Some(importance),
                )
                .await
            {
                tracing::warn!("Failed to store observation: {}", error);
            }
        }

        extracted.value
    }
}

pub(crate) fn build_perception_prompt(
    page: &PageSnapshot,
    persona: &Persona,
    intent: &str,
) -> String {
    let clickables = format_elements(&page.clickables);
    let inputs = format_elements(&page.inputs);
    let text_content = format_text_blocks(&page.text_blocks);

    format!(
        "You are the PERCEIVE module of a web browsing agent. Your job is to \
         carefully observe the current web page and generate meaningful observations.\n\n\
         The web page is at URL: {}\n\
         Title: {}\n\n\
         CLICKABLE ELEMENTS:\n{}\n\n\
         INPUT ELEMENTS:\n{}\n\n\
         TEXT CONTENT:\n{}\n\n\
         Based on what you see on this page, list all observations that would be \
         relevant to a user with this profile:\n{}\n\n\
         Their current goal is: {}\n\n\
         Generate 3-7 observations that note important features, content, options, \
         or potential issues on the page. Focus on what would be most relevant to \
         the user's goal.\n\n\
         Output as a JSON object: {{\"observations\": [\"<obs1>\", \"<obs2>\", ...]}}",
        page.url,
        page.title,
        clickables,
        inputs,
        text_content,
        persona.format_for_prompt(),
        intent
    )
}

fn format_elements(elements: &[crate::browser::PageElement]) -> String {
    if elements.is_empty() {
        return "None".to_string();
    }
    elements
        .iter()
        .map(|e| format!("- {}: {}", e.name, e.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_text_blocks(blocks: &[TextBlock]) -> String {
    if blocks.is_empty() {
        return "None".to_string();
    }
    blocks
        .iter()
        .map(|block| match block {
            TextBlock::Heading { text } => format!("HEADING: {}", text),
            TextBlock::Paragraph { text } => format!("PARAGRAPH: {}", text),
            TextBlock::List { items } => format!("LIST:\n  * {}", items.join("\n  * ")),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Importance heuristic: 5.0 base, +0.5 per word shared with the intent
/// (capped at +3.0), +0.5 per UI keyword mentioned, clamped into [1, 10].
pub(crate) fn score_observation_importance(observation: &str, intent: &str) -> f64 {
    let lowered = observation.to_lowercase();
    let intent_lowered = intent.to_lowercase();
    let intent_words: std::collections::HashSet<&str> =
        intent_lowered.split_whitespace().collect();
    let observation_words: std::collections::HashSet<&str> =
        lowered.split_whitespace().collect();

    let common = intent_words.intersection(&observation_words).count();

    let mut score = 5.0;
    score += (common as f64 * 0.5).min(3.0);
    for keyword in UI_KEYWORDS {
        if lowered.contains(keyword) {
            score += 0.5;
        }
    }
    score.clamp(1.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{FailingLlm, ScriptedLlm};
    use crate::browser::{PageElement, ScriptedBrowser, SiteFixture};
    use crate::embedding::HashingEmbedder;
    use crate::memory::MemoryStream;
    use crate::persona::PersonaValue;
    use std::sync::Arc;

    fn shop_page() -> PageSnapshot {
        PageSnapshot {
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
            text_blocks: vec![TextBlock::Heading {
                text: "Welcome to the shop".to_string(),
            }],
        }
    }

    fn agent_with(llm: Arc<dyn crate::llm_client::LanguageModel>) -> AgentController {
        let fixture = SiteFixture {
            pages: vec![shop_page()],
            links: Vec::new(),
        };
        let browser = Arc::new(ScriptedBrowser::new(fixture));
        let memory = MemoryStream::new(Arc::new(HashingEmbedder::default()));
        AgentController::new(llm, browser, memory)
    }

    async fn seeded_agent(llm: Arc<dyn crate::llm_client::LanguageModel>) -> AgentController {
        let mut agent = agent_with(llm);
        let mut persona = crate::persona::Persona::default();
        persona.insert("name", PersonaValue::One("Dana".to_string()));
        agent.set_persona(persona).await.unwrap();
        agent.set_intent("buy a red sweater").await.unwrap();
        agent
    }

    #[tokio::test]
    async fn observations_are_parsed_scored_and_stored() {
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"observations": ["There is a search input for the catalog", "A sweaters link leads to the sweater section"]}"#,
        ]));
        let mut agent = seeded_agent(llm).await;
        let observations = agent.perceive().await;
        assert_eq!(observations.len(), 2);

        let stored = agent.memory().by_kind(MemoryKind::Observation);
        assert_eq!(stored.len(), 2);
        for record in &stored {
            assert_eq!(record.source, "perception");
            assert!(record.importance >= 1.0 && record.importance <= 10.0);
        }
    }

    #[tokio::test]
    async fn bullet_list_response_is_salvaged() {
        let llm = Arc::new(ScriptedLlm::new([
            "Here is what I noticed:\n- a big search input\n- a sweaters link",
        ]));
        let mut agent = seeded_agent(llm).await;
        let observations = agent.perceive().await;
        assert_eq!(observations.len(), 2);
        assert_eq!(agent.memory().by_kind(MemoryKind::Observation).len(), 2);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_no_observations() {
        let mut agent = seeded_agent(Arc::new(FailingLlm)).await;
        let observations = agent.perceive().await;
        assert!(observations.is_empty());
        assert!(agent.memory().by_kind(MemoryKind::Observation).is_empty());
    }

    #[test]
    fn importance_rises_with_intent_overlap_and_ui_keywords() {
        let plain = score_observation_importance("a paragraph about shipping", "buy a red sweater");
        let relevant = score_observation_importance(
            "a red sweater is listed in the search results",
            "buy a red sweater",
        );
        assert!(relevant > plain);
        assert!((1.0..=10.0).contains(&plain));
        assert!((1.0..=10.0).contains(&relevant));

        // A pathological observation stuffed with keywords still clamps.
        let stuffed = score_observation_importance(
            "buy a red sweater button link menu search input form error navigation \
             buy a red sweater button link menu search input form error navigation",
            "buy a red sweater",
        );
        assert_eq!(stuffed, 10.0);
    }

    #[test]
    fn prompt_embeds_page_persona_and_intent() {
        let mut persona = crate::persona::Persona::default();
        persona.insert("name", PersonaValue::One("Dana".to_string()));
        let prompt = build_perception_prompt(&shop_page(), &persona, "buy a red sweater");
        assert!(prompt.contains("CLICKABLE ELEMENTS:"));
        assert!(prompt.contains("- sweaters_link: Browse sweaters"));
        assert!(prompt.contains("- search_input: Search the catalog"));
        assert!(prompt.contains("HEADING: Welcome to the shop"));
        assert!(prompt.contains("name: Dana"));
        assert!(prompt.contains("buy a red sweater"));
        assert!(prompt.contains("\"observations\""));
    }
}
