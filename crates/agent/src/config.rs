//! Configuration file support for the server.
//!
//! Loaded from `codeforge.toml` at the project root when present; every field
//! has a default so a missing or partial file is fine. User values are
//! deep-merged over the defaults before deserialization so nested tables can
//! be overridden key by key.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bind host for the HTTP server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port for the HTTP server
pub const DEFAULT_PORT: u16 = 8765;

/// Prompt-token threshold that triggers dialog summarization
pub const DEFAULT_SUMMARY_TRIGGER_TOKEN_BUDGET: u32 = 20_000;

/// Visible messages retained verbatim after a summary cut
pub const KEEP_LAST_MESSAGES: usize = 24;

/// Consecutive recoverable tool errors before the loop gives up
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Bytes of tool output kept inline as a truncated preview
pub const DEFAULT_PREVIEW_BYTES: usize = 4096;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_summary_trigger_token_budget() -> u32 {
    DEFAULT_SUMMARY_TRIGGER_TOKEN_BUDGET
}

fn default_max_consecutive_errors() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_ERRORS
}

fn default_preview_bytes() -> usize {
    DEFAULT_PREVIEW_BYTES
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

/// HTTP server section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// LLM section: model identity plus loop budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_summary_trigger_token_budget")]
    pub summary_trigger_token_budget: u32,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            summary_trigger_token_budget: default_summary_trigger_token_budget(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

/// Tool-result storage section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResultsConfig {
    #[serde(default = "default_preview_bytes")]
    pub preview_bytes: usize,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            preview_bytes: default_preview_bytes(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub results: ResultsConfig,
}

impl AgentConfig {
    /// Load from a TOML file, deep-merging user values over defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let user: toml::Value = toml::from_str(text).context("invalid TOML in config file")?;
        let defaults: toml::Value =
            toml::from_str(&toml::to_string(&AgentConfig::default())?)
                .context("failed to serialize default config")?;
        let merged = deep_merge(defaults, user);
        toml::from_str(&toml::to_string(&merged)?)
            .context("config file does not match expected schema")
    }

    /// Load `codeforge.toml` from the project root if present, defaults otherwise.
    pub fn load_for_project(project_root: &Path) -> Result<Self> {
        let path = project_root.join("codeforge.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate semantic constraints the schema cannot express.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.llm.model.trim().is_empty() {
            errors.push("llm.model must not be empty".to_string());
        }
        if self.llm.max_consecutive_errors == 0 {
            errors.push("llm.max_consecutive_errors must be at least 1".to_string());
        }
        if self.results.preview_bytes == 0 {
            errors.push("results.preview_bytes must be at least 1".to_string());
        }
        errors
    }
}

/// Recursively merge `user` over `defaults`. Tables merge key by key; every
/// other value type replaces wholesale. Merging `defaults ⊕ {}` yields
/// `defaults`, and the operation is idempotent.
pub fn deep_merge(defaults: toml::Value, user: toml::Value) -> toml::Value {
    match (defaults, user) {
        (toml::Value::Table(mut base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            toml::Value::Table(base)
        }
        (_, user) => user,
    }
}
