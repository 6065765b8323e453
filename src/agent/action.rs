//! Action: translate the current plan step into one executed action.
//!
//! The model is asked for a JSON array holding exactly one action object.
//! Every action is logged to the memory stream *before* dispatch so a
//! crashing adapter still leaves an audit trail; a failed dispatch appends
//! a second action_taken record and ends the cycle immediately.

use serde::Deserialize;

use crate::agent::{format_memories, AgentController};
use crate::browser::{Action, ActionOutcome, PageSnapshot};
use crate::memory::{MemoryKind, MemoryRecord};
use crate::parse;
use crate::persona::Persona;

const ACTION_MEMORY_LIMIT: usize = 7;

#[derive(Debug, Deserialize)]
struct ActionsLlmResponse {
    actions: Vec<Action>,
}

impl AgentController {
    /// Select and execute the next action. Never errors; every failure
    /// mode collapses into an unsuccessful [`ActionOutcome`].
    pub async fn act(&mut self) -> ActionOutcome {
        let query = format!("How to execute this step: {}", self.next_step);
        let memories = match self
            .memory
            .retrieve(&query, None, ACTION_MEMORY_LIMIT, &self.weights.action)
            .await
        {
            Ok(memories) => memories,
            Err(error) => {
                tracing::warn!("Action retrieval failed: {}", error);
                Vec::new()
            }
        };

        let page = match self.browser.observe_page().await {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!("Action module could not observe the page: {}", error);
                PageSnapshot::blank(&self.browser.current_url().await)
            }
        };

        let prompt = build_action_prompt(
            &page,
            &self.persona,
            &self.intent,
            &self.next_step,
            &memories,
        );
        let response = match self.llm.generate(&prompt, self.temperature).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Action model call failed: {}", error);
                return ActionOutcome::failed("Failed to generate action");
            }
        };

        let actions = match parse_actions(&response) {
            Some(actions) if !actions.is_empty() => actions,
            _ => {
                tracing::warn!("Failed to parse action response: {}", response);
                return ActionOutcome::failed("Failed to parse action response");
            }
        };

        let mut last_outcome = ActionOutcome::failed("No action executed");
        for action in actions {
            // Log before dispatch so failures are still on record.
            let description = action.describe();
            let metadata = serde_json::to_value(&action).unwrap_or(serde_json::Value::Null);
            if let Err(error) = self
                .memory
                .append_full(
                    MemoryKind::ActionTaken,
                    &description,
                    "action",
                    Some(8.0),
                    Vec::new(),
                    metadata,
                )
                .await
            {
                tracing::warn!("Failed to store action record: {}", error);
                return ActionOutcome::failed(format!("Memory append failed: {}", error));
            }

            let outcome = match self.browser.execute(&action).await {
                Ok(outcome) => outcome,
                Err(error) => ActionOutcome::failed(format!("Adapter error: {}", error)),
            };
            self.record_action(&action).await;

            if !outcome.success {
                let content = format!("Action failed: {}", outcome.message);
                if let Err(error) = self
                    .memory
                    .append(MemoryKind::ActionTaken, &content, "action", Some(9.0))
                    .await
                {
                    tracing::warn!("Failed to store action failure record: {}", error);
                }
                return outcome;
            }
            last_outcome = outcome;
        }

        last_outcome
    }
}

/// Accept either `{"actions": [...]}` or a bare action array.
fn parse_actions(response: &str) -> Option<Vec<Action>> {
    if let Ok(parsed) = parse::parse_json::<ActionsLlmResponse>(response) {
        return Some(parsed.actions);
    }
    parse::parse_json::<Vec<Action>>(response).ok()
}

pub(crate) fn build_action_prompt(
    page: &PageSnapshot,
    persona: &Persona,
    intent: &str,
    next_step: &str,
    memories: &[MemoryRecord],
) -> String {
    let clickables = page
        .clickables
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let inputs = page
        .inputs
        .iter()
        .map(|i| format!("- {}: {}", i.name, i.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are the ACTION module of a web browsing agent. Your job is to \
         translate the current plan step into specific actions that can be \
         executed on the web page.\n\n\
         PERSONA:\n{}\n\n\
         INTENT:\n{}\n\n\
         CURRENT PLAN STEP:\n{}\n\n\
         ENVIRONMENT:\n\
         URL: {}\n\
         Title: {}\n\n\
         CLICKABLE ELEMENTS:\n{}\n\n\
         INPUT ELEMENTS:\n{}\n\n\
         RELEVANT MEMORIES:\n{}\n\n\
         Translate the current plan step into ONE specific action that can be \
         executed on the web page. Choose from these action types:\n\
         1. click - Click on a clickable element\n\
         2. input - Enter text into an input element\n\
         3. scroll - Scroll the page (value: \"up\", \"down\", \"top\", or \"bottom\")\n\
         4. navigate - Go to a specific URL (target: the URL)\n\
         5. back - Go back to the previous page\n\
         6. wait - Wait for a specified number of seconds\n\n\
         Output as a JSON array with a SINGLE action object:\n\
         {{\n\
           \"actions\": [\n\
             {{\n\
               \"type\": \"click|input|scroll|navigate|back|wait\",\n\
               \"name\": \"element_name (for click/input)\",\n\
               \"value\": \"text to input or scroll direction\",\n\
               \"description\": \"Human-readable description of what this action accomplishes\"\n\
             }}\n\
           ]\n\
         }}\n\n\
         Your output MUST be valid JSON.",
        persona.format_for_prompt(),
        intent,
        next_step,
        page.url,
        page.title,
        clickables,
        inputs,
        format_memories(memories)
    )
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

    fn shop_fixture() -> SiteFixture {
        SiteFixture {
            pages: vec![PageSnapshot {
                url: "https://shop.test/".to_string(),
                title: "Shop".to_string(),
                clickables: vec![PageElement {
                    name: "checkout_button".to_string(),
                    description: "Go to checkout".to_string(),
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

    async fn seeded_agent(llm: Arc<dyn crate::llm_client::LanguageModel>) -> AgentController {
        let browser = Arc::new(ScriptedBrowser::new(shop_fixture()));
        let memory = MemoryStream::new(Arc::new(HashingEmbedder::default()));
        let mut agent = AgentController::new(llm, browser, memory);
        let mut persona = Persona::default();
        persona.insert("name", PersonaValue::One("Dana".to_string()));
        agent.set_persona(persona).await.unwrap();
        agent.set_intent("buy a red sweater").await.unwrap();
        agent.start_session("https://shop.test/").await.unwrap();
        agent
    }

    #[tokio::test]
    async fn successful_action_is_logged_then_executed() {
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"actions": [{"type": "input", "name": "search_input", "value": "red sweater", "description": "search for the sweater"}]}"#,
        ]));
        let mut agent = seeded_agent(llm).await;
        let before = agent.memory().by_kind(MemoryKind::ActionTaken).len();

        let outcome = agent.act().await;
        assert!(outcome.success);

        let actions = agent.memory().by_kind(MemoryKind::ActionTaken);
        assert_eq!(actions.len(), before + 1);
        let logged = actions.last().unwrap();
        assert!(logged.content.contains("Entered text 'red sweater'"));
        assert_eq!(logged.metadata["type"], "input");
        assert_eq!(logged.metadata["name"], "search_input");
    }

    #[tokio::test]
    async fn failed_action_produces_attempt_and_failure_records() {
        // The element does not exist on the page, so dispatch fails.
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"actions": [{"type": "input", "name": "missing_input", "value": "red sweater", "description": "search"}]}"#,
        ]));
        let mut agent = seeded_agent(llm).await;
        let before = agent.memory().by_kind(MemoryKind::ActionTaken).len();

        let outcome = agent.act().await;
        assert!(!outcome.success);

        let actions = agent.memory().by_kind(MemoryKind::ActionTaken);
        assert_eq!(actions.len(), before + 2);
        let attempt = &actions[actions.len() - 2];
        let failure = &actions[actions.len() - 1];
        assert!(attempt.content.contains("Entered text 'red sweater'"));
        assert!(failure.content.starts_with("Action failed:"));
        assert_eq!(failure.importance, 9.0);
    }

    #[tokio::test]
    async fn unparseable_action_response_fails_without_records() {
        let llm = Arc::new(ScriptedLlm::new(["just click around I guess"]));
        let mut agent = seeded_agent(llm).await;
        let before = agent.memory().by_kind(MemoryKind::ActionTaken).len();

        let outcome = agent.act().await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to parse action response");
        assert_eq!(agent.memory().by_kind(MemoryKind::ActionTaken).len(), before);
    }

    #[tokio::test]
    async fn unsupported_action_type_fails_without_crashing() {
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"actions": [{"type": "teleport", "name": "elsewhere"}]}"#,
        ]));
        let mut agent = seeded_agent(llm).await;
        let outcome = agent.act().await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_failed_outcome() {
        let mut agent = seeded_agent(Arc::new(FailingLlm)).await;
        let outcome = agent.act().await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to generate action");
    }

    #[test]
    fn bare_array_responses_are_accepted() {
        let actions =
            parse_actions(r#"[{"type": "back", "description": "return to results"}]"#).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Back { .. }));
    }

    #[test]
    fn prompt_lists_elements_and_plan_step() {
        let fixture = shop_fixture();
        let prompt = build_action_prompt(
            &fixture.pages[0],
            &Persona::default(),
            "buy a red sweater",
            "search for red sweater",
            &[],
        );
        assert!(prompt.contains("CURRENT PLAN STEP:\nsearch for red sweater"));
        assert!(prompt.contains("- checkout_button: Go to checkout"));
        assert!(prompt.contains("- search_input: Search the catalog"));
        assert!(prompt.contains("\"actions\""));
    }
}
