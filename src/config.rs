//! Service configuration, resolved once at startup.

use serde::{Deserialize, Serialize};

/// Which session store implementation to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    Memory,
    File,
}

/// Session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    /// Store implementation
    #[serde(rename = "type")]
    pub kind: SessionStoreKind,
    /// Directory for the file variant
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            kind: SessionStoreKind::Memory,
            directory: None,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name ("anthropic", "openai")
    pub provider: String,
    /// Model identifier passed to the provider
    pub model: String,
    /// API key
    #[serde(default)]
    pub api_key: String,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            api_key: String::new(),
            base_url: None,
        }
    }
}

/// Reasoner backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Backend name ("builtin" unless an external engine is registered)
    pub provider: String,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            provider: "builtin".to_string(),
        }
    }
}

/// How much detail query responses carry in their debug bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    None,
    #[default]
    Basic,
    Verbose,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    /// System default base strategy id
    #[serde(default = "default_translation_strategy")]
    pub translation_strategy: String,
    #[serde(default)]
    pub debug_level: DebugLevel,
    /// Per-call LLM timeout in milliseconds
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Per-call reasoner timeout in milliseconds
    #[serde(default = "default_reasoner_timeout_ms")]
    pub reasoner_timeout_ms: u64,
}

fn default_translation_strategy() -> String {
    "SIR-R1".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    120_000
}

fn default_reasoner_timeout_ms() -> u64 {
    10_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            session_store: SessionStoreConfig::default(),
            llm: LlmConfig::default(),
            reasoner: ReasonerConfig::default(),
            translation_strategy: default_translation_strategy(),
            debug_level: DebugLevel::default(),
            llm_timeout_ms: default_llm_timeout_ms(),
            reasoner_timeout_ms: default_reasoner_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.translation_strategy = strategy.into();
        self
    }

    pub fn with_debug_level(mut self, level: DebugLevel) -> Self {
        self.debug_level = level;
        self
    }

    pub fn with_file_store(mut self, directory: impl Into<String>) -> Self {
        self.session_store = SessionStoreConfig {
            kind: SessionStoreKind::File,
            directory: Some(directory.into()),
        };
        self
    }
}
