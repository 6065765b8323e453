use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub llm_temperature: f32,

    // Embedding configuration. "hash" runs the deterministic local
    // embedder; "http" talks to an OpenAI-compatible /embeddings endpoint.
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    #[serde(default = "default_embedding_url")]
    pub embedding_api_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    // Session defaults
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,

    // HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_embedding_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dim() -> usize {
    256
}

fn default_max_cycles() -> usize {
    10
}

fn default_bind_addr() -> String {
    "127.0.0.1:8808".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_temperature: default_temperature(),
            embedding_provider: default_embedding_provider(),
            embedding_api_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            embedding_api_key: None,
            embedding_dim: default_embedding_dim(),
            max_cycles: default_max_cycles(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl AgentConfig {
    /// Directory containing the executable; config lives next to it.
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("uxagent.toml")
    }

    /// Load from uxagent.toml next to the executable, falling back to the
    /// working directory, then to defaults + environment variables.
    pub fn load() -> Self {
        for path in [Self::config_path(), PathBuf::from("uxagent.toml")] {
            if let Ok(contents) = fs::read_to_string(&path) {
                match toml::from_str::<AgentConfig>(&contents) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config.apply_env();
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::default().apply_env()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Environment variables override file values.
    fn apply_env(mut self) -> Self {
        if let Ok(url) = env::var("UXAGENT_LLM_API_URL") {
            self.llm_api_url = url;
        }
        if let Ok(model) = env::var("UXAGENT_LLM_MODEL") {
            self.llm_model = model;
        }
        if let Ok(key) = env::var("UXAGENT_LLM_API_KEY") {
            if !key.trim().is_empty() {
                self.llm_api_key = Some(key);
            }
        }
        if let Ok(provider) = env::var("UXAGENT_EMBEDDING_PROVIDER") {
            self.embedding_provider = provider;
        }
        if let Ok(url) = env::var("UXAGENT_EMBEDDING_API_URL") {
            self.embedding_api_url = url;
        }
        if let Ok(model) = env::var("UXAGENT_EMBEDDING_MODEL") {
            self.embedding_model = model;
        }
        if let Ok(key) = env::var("UXAGENT_EMBEDDING_API_KEY") {
            if !key.trim().is_empty() {
                self.embedding_api_key = Some(key);
            }
        }
        if let Ok(bind) = env::var("UXAGENT_BIND") {
            self.bind_addr = bind;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.llm_api_url, default_llm_url());
        assert_eq!(config.embedding_provider, "hash");
        assert_eq!(config.max_cycles, 10);
        assert!(config.llm_api_key.is_none());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: AgentConfig = toml::from_str(
            r#"
            llm_model = "qwen2.5"
            max_cycles = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.llm_model, "qwen2.5");
        assert_eq!(config.max_cycles, 4);
        assert_eq!(config.bind_addr, default_bind_addr());
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = AgentConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let back: AgentConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(back.llm_api_url, config.llm_api_url);
        assert_eq!(back.embedding_dim, config.embedding_dim);
    }
}
