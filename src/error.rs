//! Error types for nlr-core.
//!
//! Every error that can cross the coordinator boundary carries a stable
//! [`ErrorCode`] so transports can map failures to wire responses without
//! inspecting message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using nlr-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error-code surface. Serializes as the SCREAMING_SNAKE strings
/// transports key their status mapping on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    SessionNotFound,
    SessionAddFactsFailed,
    StrategyNotFound,
    StrategyInvalidOutput,
    StrategyExecutionError,
    InvalidSirStructure,
    JsonParsingFailed,
    InvalidGeneratedProlog,
    NoFactsExtracted,
    NoRulesExtracted,
    EmptyExplanationGenerated,
    LlmEmptyResponse,
    LlmRequestFailed,
    PrologQuerySyntax,
    ReasonerError,
    InternalKbNotFound,
    PromptTemplateNotFound,
    PromptFormattingFailed,
    EmbeddingServiceError,
    NotImplemented,
}

impl ErrorCode {
    /// The wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionAddFactsFailed => "SESSION_ADD_FACTS_FAILED",
            Self::StrategyNotFound => "STRATEGY_NOT_FOUND",
            Self::StrategyInvalidOutput => "STRATEGY_INVALID_OUTPUT",
            Self::StrategyExecutionError => "STRATEGY_EXECUTION_ERROR",
            Self::InvalidSirStructure => "INVALID_SIR_STRUCTURE",
            Self::JsonParsingFailed => "JSON_PARSING_FAILED",
            Self::InvalidGeneratedProlog => "INVALID_GENERATED_PROLOG",
            Self::NoFactsExtracted => "NO_FACTS_EXTRACTED",
            Self::NoRulesExtracted => "NO_RULES_EXTRACTED",
            Self::EmptyExplanationGenerated => "EMPTY_EXPLANATION_GENERATED",
            Self::LlmEmptyResponse => "LLM_EMPTY_RESPONSE",
            Self::LlmRequestFailed => "LLM_REQUEST_FAILED",
            Self::PrologQuerySyntax => "PROLOG_QUERY_SYNTAX",
            Self::ReasonerError => "REASONER_ERROR",
            Self::InternalKbNotFound => "INTERNAL_KB_NOT_FOUND",
            Self::PromptTemplateNotFound => "PROMPT_TEMPLATE_NOT_FOUND",
            Self::PromptFormattingFailed => "PROMPT_FORMATTING_FAILED",
            Self::EmbeddingServiceError => "EMBEDDING_SERVICE_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during translation, execution, and storage.
#[derive(Error, Debug)]
pub enum Error {
    /// Client supplied empty or malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown session id
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Appending clauses to a session failed
    #[error("Failed to add clauses to session {session_id}: {message}")]
    SessionAddFacts { session_id: String, message: String },

    /// Unknown strategy id or hash
    #[error("Strategy not found: {strategy_id}")]
    StrategyNotFound { strategy_id: String },

    /// A strategy returned a value of the wrong shape
    #[error("Strategy {strategy_id} produced invalid output: {message}")]
    StrategyInvalidOutput {
        strategy_id: String,
        message: String,
    },

    /// Pipeline execution failed for an unclassified reason
    #[error("Strategy execution error: {message}")]
    StrategyExecution {
        strategy_id: Option<String>,
        message: String,
    },

    /// A SIR record violated its required shape
    #[error("Invalid SIR structure: {0}")]
    InvalidSirStructure(String),

    /// LLM output could not be parsed as JSON
    #[error("JSON parsing failed: {message}")]
    JsonParsing { message: String, snippet: String },

    /// A generated clause failed reasoner validation
    #[error("Invalid generated clause `{clause}`: {diagnostic}")]
    InvalidGeneratedProlog { clause: String, diagnostic: String },

    /// Assert pipeline produced no clauses
    #[error("No facts could be extracted from the input")]
    NoFactsExtracted,

    /// Rule translation produced no rules
    #[error("No rules could be extracted from the input")]
    NoRulesExtracted,

    /// Explanation synthesis produced empty text
    #[error("Generated explanation was empty")]
    EmptyExplanation,

    /// LLM returned an empty completion
    #[error("LLM returned an empty response")]
    LlmEmptyResponse,

    /// LLM transport or API failure
    #[error("LLM request failed: {provider} - {message}")]
    LlmRequest { provider: String, message: String },

    /// The query string itself failed to parse
    #[error("Query syntax error: {diagnostic}")]
    PrologQuerySyntax { query: String, diagnostic: String },

    /// Reasoner crashed or rejected the knowledge base at runtime
    #[error("Reasoner error: {0}")]
    Reasoner(String),

    /// A knowledge base that must exist was missing
    #[error("Internal error: knowledge base missing for session {session_id}")]
    InternalKbNotFound { session_id: String },

    /// Unknown prompt template name
    #[error("Prompt template not found: {name}")]
    PromptTemplateNotFound { name: String },

    /// Template fill failed
    #[error("Prompt formatting failed for `{template}`: {message}")]
    PromptFormatting { template: String, message: String },

    /// Embedding backend unavailable or failed
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// Optional capability not provided by the installed implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Session store I/O failure
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error onto the stable code surface.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::SessionAddFacts { .. } | Self::Store(_) => ErrorCode::SessionAddFactsFailed,
            Self::StrategyNotFound { .. } => ErrorCode::StrategyNotFound,
            Self::StrategyInvalidOutput { .. } => ErrorCode::StrategyInvalidOutput,
            Self::StrategyExecution { .. } => ErrorCode::StrategyExecutionError,
            Self::InvalidSirStructure(_) => ErrorCode::InvalidSirStructure,
            Self::JsonParsing { .. } => ErrorCode::JsonParsingFailed,
            Self::InvalidGeneratedProlog { .. } => ErrorCode::InvalidGeneratedProlog,
            Self::NoFactsExtracted => ErrorCode::NoFactsExtracted,
            Self::NoRulesExtracted => ErrorCode::NoRulesExtracted,
            Self::EmptyExplanation => ErrorCode::EmptyExplanationGenerated,
            Self::LlmEmptyResponse => ErrorCode::LlmEmptyResponse,
            Self::LlmRequest { .. } => ErrorCode::LlmRequestFailed,
            Self::PrologQuerySyntax { .. } => ErrorCode::PrologQuerySyntax,
            Self::Reasoner(_) => ErrorCode::ReasonerError,
            Self::InternalKbNotFound { .. } => ErrorCode::InternalKbNotFound,
            Self::PromptTemplateNotFound { .. } => ErrorCode::PromptTemplateNotFound,
            Self::PromptFormatting { .. } => ErrorCode::PromptFormattingFailed,
            Self::EmbeddingService(_) => ErrorCode::EmbeddingServiceError,
            Self::NotImplemented(_) => ErrorCode::NotImplemented,
            Self::Serialization(_) | Self::Internal(_) => ErrorCode::StrategyExecutionError,
        }
    }

    /// Fragment of the offending input, where one exists, for `details`.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::JsonParsing { snippet, .. } => Some(snippet.clone()),
            Self::InvalidGeneratedProlog { clause, diagnostic } => {
                Some(format!("{clause} ({diagnostic})"))
            }
            Self::PrologQuerySyntax { query, diagnostic } => {
                Some(format!("{query} ({diagnostic})"))
            }
            Self::InvalidSirStructure(detail) => Some(detail.clone()),
            _ => None,
        }
    }

    /// Create a session-not-found error.
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Create a strategy-not-found error.
    pub fn strategy_not_found(strategy_id: impl Into<String>) -> Self {
        Self::StrategyNotFound {
            strategy_id: strategy_id.into(),
        }
    }

    /// Create an LLM request error.
    pub fn llm_request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmRequest {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a strategy execution error without a known strategy.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::StrategyExecution {
            strategy_id: None,
            message: message.into(),
        }
    }
}
