//! Shared parsing for model output.
//!
//! Every module that reads language-model completions goes through the same
//! two-stage contract: strict JSON (after stripping markdown fences and
//! locating the first balanced object/array), then a heuristic list
//! extraction for responses that degenerated into prose bullets. The stage
//! that produced a value is reported so callers can tell a clean parse from
//! a salvaged one.

use anyhow::{anyhow, Result};
use regex_lite::Regex;
use serde::de::DeserializeOwned;

/// Which stage of the parsing contract produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOrigin {
    StrictJson,
    ListFallback,
}

#[derive(Debug, Clone)]
pub struct Extracted<T> {
    pub value: T,
    pub origin: ParseOrigin,
}

impl<T> Extracted<T> {
    pub fn used_fallback(&self) -> bool {
        self.origin == ParseOrigin::ListFallback
    }
}

/// Parse a model response into `T`, tolerating markdown fences and
/// surrounding prose. Fails only when no balanced JSON payload parses.
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T> {
    let trimmed = response.trim();
    if let Ok(parsed) = serde_json::from_str::<T>(trimmed) {
        return Ok(parsed);
    }

    let unfenced = strip_code_fences(trimmed);
    if let Ok(parsed) = serde_json::from_str::<T>(unfenced.trim()) {
        return Ok(parsed);
    }

    if let Some(candidate) = balanced_json(unfenced) {
        if let Ok(parsed) = serde_json::from_str::<T>(candidate) {
            return Ok(parsed);
        }
    }

    Err(anyhow!(
        "no parseable JSON payload in response: {}",
        preview(response)
    ))
}

/// Pull the body out of a ```json fenced block, if one is present.
pub fn strip_code_fences(response: &str) -> &str {
    for marker in ["```json", "```"] {
        if let Some(start) = response.find(marker) {
            let body = &response[start + marker.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }
    response
}

/// Locate the first balanced JSON object or array substring.
///
/// Tracks string/escape state so braces inside string literals do not
/// confuse the depth count.
fn balanced_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b if b == open => depth += 1,
            b if b == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the string array stored under `key` in a JSON object response,
/// falling back to bullet/numbered list items when JSON parsing fails.
/// Never errors; a hopeless response yields an empty fallback list.
pub fn extract_string_list(response: &str, key: &str) -> Extracted<Vec<String>> {
    if let Ok(value) = parse_json::<serde_json::Value>(response) {
        if let Some(items) = value.get(key).and_then(|v| v.as_array()) {
            let strings: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !strings.is_empty() {
                return Extracted {
                    value: strings,
                    origin: ParseOrigin::StrictJson,
                };
            }
        }
    }

    Extracted {
        value: extract_list_items(response),
        origin: ParseOrigin::ListFallback,
    }
}

/// Pull bullet ("- item", "* item") and numbered ("1. item") lines out of
/// free text. Last-resort recovery when the model ignored the JSON format.
pub fn extract_list_items(text: &str) -> Vec<String> {
    let item = Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+(.+)$").expect("list item pattern");
    text.lines()
        .filter_map(|line| {
            item.captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|line| !line.is_empty())
        .collect()
}

fn preview(response: &str) -> String {
    let mut out: String = response.chars().take(200).collect();
    if response.chars().count() > 200 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct PlanShape {
        plan: String,
        next_step: String,
    }

    #[test]
    fn parses_bare_json() {
        let parsed: PlanShape =
            parse_json(r#"{"plan": "Step 1", "next_step": "click search"}"#).unwrap();
        assert_eq!(parsed.plan, "Step 1");
        assert_eq!(parsed.next_step, "click search");
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let response = "Sure! Here is the plan:\n```json\n{\"plan\": \"Step 1\", \"next_step\": \"open menu\"}\n```\nLet me know.";
        let parsed: PlanShape = parse_json(response).unwrap();
        assert_eq!(parsed.next_step, "open menu");
    }

    #[test]
    fn locates_balanced_object_in_prose() {
        let response =
            "The answer is {\"plan\": \"a {nested} brace\", \"next_step\": \"b\"} hope that helps";
        let parsed: PlanShape = parse_json(response).unwrap();
        assert_eq!(parsed.plan, "a {nested} brace");
    }

    #[test]
    fn braces_inside_strings_do_not_break_balance() {
        let response = r#"{"plan": "press the } key", "next_step": "done"}"#;
        let parsed: PlanShape = parse_json(response).unwrap();
        assert_eq!(parsed.plan, "press the } key");
    }

    #[test]
    fn rejects_unparseable_text() {
        assert!(parse_json::<PlanShape>("no json here at all").is_err());
    }

    #[test]
    fn string_list_from_clean_json() {
        let extracted = extract_string_list(
            r#"{"observations": ["a search bar", "a login link"]}"#,
            "observations",
        );
        assert_eq!(extracted.origin, ParseOrigin::StrictJson);
        assert_eq!(extracted.value, vec!["a search bar", "a login link"]);
    }

    #[test]
    fn string_list_falls_back_to_bullets() {
        let extracted = extract_string_list(
            "Observations:\n- a search bar\n- a login link\n2. a cart icon",
            "observations",
        );
        assert!(extracted.used_fallback());
        assert_eq!(
            extracted.value,
            vec!["a search bar", "a login link", "a cart icon"]
        );
    }

    #[test]
    fn string_list_empty_when_nothing_recoverable() {
        let extracted = extract_string_list("I could not read the page.", "observations");
        assert!(extracted.used_fallback());
        assert!(extracted.value.is_empty());
    }
}
