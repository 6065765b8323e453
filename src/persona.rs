//! Personas: who the synthetic user is.
//!
//! A persona is a free-form attribute map ("name" -> "Maria Lopez",
//! "goals" -> [...]). String and string-list attributes seed the memory
//! stream as persona_detail records; everything is formatted into prompts.
//! The generator asks the language model for a fresh persona under
//! demographic constraints.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm_client::LanguageModel;
use crate::parse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonaValue {
    One(String),
    Many(Vec<String>),
    Other(serde_json::Value),
}

impl PersonaValue {
    fn format(&self) -> String {
        match self {
            PersonaValue::One(value) => value.clone(),
            PersonaValue::Many(values) => values.join(", "),
            PersonaValue::Other(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona(pub BTreeMap<String, PersonaValue>);

impl Persona {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PersonaValue) {
        self.0.insert(key.into(), value);
    }

    /// One "key: value" line per attribute, for prompt inclusion.
    pub fn format_for_prompt(&self) -> String {
        if self.0.is_empty() {
            return "No persona defined".to_string();
        }
        self.0
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value.format()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// "key: value" strings for seeding persona_detail memories: one per
    /// string attribute, one per list element. Non-text attributes are
    /// prompt-only.
    pub fn detail_contents(&self) -> Vec<String> {
        let mut details = Vec::new();
        for (key, value) in &self.0 {
            match value {
                PersonaValue::One(v) => details.push(format!("{}: {}", key, v)),
                PersonaValue::Many(items) => {
                    for item in items {
                        details.push(format!("{}: {}", key, item));
                    }
                }
                PersonaValue::Other(_) => {}
            }
        }
        details
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse persona file")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize persona")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write persona file {}", path.display()))?;
        Ok(())
    }
}

/// Demographic constraints for persona generation. `None` means "any".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaConstraints {
    #[serde(default)]
    pub age_range: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub tech_experience: Option<String>,
    #[serde(default)]
    pub income_level: Option<String>,
    #[serde(default)]
    pub education_level: Option<String>,
}

pub struct PersonaGenerator {
    llm: Arc<dyn LanguageModel>,
}

impl PersonaGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, constraints: &PersonaConstraints) -> Result<Persona> {
        let prompt = build_persona_prompt(constraints);
        let response = self
            .llm
            .generate(&prompt, 0.7)
            .await
            .context("Persona generation call failed")?;
        let persona: Persona =
            parse::parse_json(&response).context("Persona response was not a JSON object")?;
        if persona.is_empty() {
            anyhow::bail!("Persona generation returned an empty object");
        }
        Ok(persona)
    }
}

fn build_persona_prompt(constraints: &PersonaConstraints) -> String {
    let mut lines = Vec::new();
    if let Some(age) = &constraints.age_range {
        lines.push(format!("- Age range: {}", age));
    }
    if let Some(gender) = &constraints.gender {
        lines.push(format!("- Gender: {}", gender));
    }
    if let Some(tech) = &constraints.tech_experience {
        lines.push(format!("- Tech experience level: {}", tech));
    }
    if let Some(income) = &constraints.income_level {
        lines.push(format!("- Income level: {}", income));
    }
    if let Some(education) = &constraints.education_level {
        lines.push(format!("- Education level: {}", education));
    }
    let constraints_text = if lines.is_empty() {
        "No specific constraints.".to_string()
    } else {
        lines.join("\n")
    };

    format!(
        "Generate a realistic user persona for UX testing.\n\n\
         Include basic demographics (name, age, gender, location, occupation,\n\
         education, income), a technical profile (experience level, devices,\n\
         favorite sites), behavioral traits, 2-4 goals, and 2-4 pain points.\n\n\
         Constraints:\n{}\n\n\
         Return ONLY a JSON object mapping attribute names to a string or an\n\
         array of strings, for example:\n\
         {{\n\
           \"name\": \"Full Name\",\n\
           \"age\": \"34\",\n\
           \"occupation\": \"Job Title\",\n\
           \"tech_experience\": \"Intermediate\",\n\
           \"goals\": [\"goal 1\", \"goal 2\"],\n\
           \"pain_points\": [\"pain 1\", \"pain 2\"]\n\
         }}",
        constraints_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_persona() -> Persona {
        let mut persona = Persona::default();
        persona.insert("name", PersonaValue::One("Maria Lopez".to_string()));
        persona.insert(
            "goals",
            PersonaValue::Many(vec![
                "find affordable clothes".to_string(),
                "avoid creating accounts".to_string(),
            ]),
        );
        persona.insert("age", PersonaValue::Other(serde_json::json!(34)));
        persona
    }

    #[test]
    fn detail_contents_flatten_lists_and_skip_non_text() {
        let details = sample_persona().detail_contents();
        assert_eq!(
            details,
            vec![
                "goals: find affordable clothes",
                "goals: avoid creating accounts",
                "name: Maria Lopez",
            ]
        );
    }

    #[test]
    fn prompt_formatting_includes_every_attribute() {
        let text = sample_persona().format_for_prompt();
        assert!(text.contains("name: Maria Lopez"));
        assert!(text.contains("goals: find affordable clothes, avoid creating accounts"));
        assert!(text.contains("age: 34"));
    }

    #[test]
    fn persona_roundtrips_through_json() {
        let persona = sample_persona();
        let json = serde_json::to_string(&persona).unwrap();
        let back: Persona = serde_json::from_str(&json).unwrap();
        assert_eq!(back, persona);
    }

    #[test]
    fn constraint_prompt_mentions_only_set_constraints() {
        let prompt = build_persona_prompt(&PersonaConstraints {
            age_range: Some("26-35".to_string()),
            tech_experience: Some("Beginner".to_string()),
            ..Default::default()
        });
        assert!(prompt.contains("Age range: 26-35"));
        assert!(prompt.contains("Tech experience level: Beginner"));
        assert!(!prompt.contains("Income level"));
    }
}
