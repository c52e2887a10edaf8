//! Input routing: recommend a strategy hash for an incoming text.
//!
//! Two interchangeable variants implement the same contract; the
//! coordinator must not depend on which is installed. Routers never fail a
//! request: database and embedding errors degrade to `None` and the caller
//! falls back to the system default strategy.

mod keyword;
mod semantic;

pub use keyword::KeywordRouter;
pub use semantic::{archetype_catalog, cosine_similarity, Archetype, SemanticRouter};

use async_trait::async_trait;

/// Coarse classification used by the keyword router and as the semantic
/// router's fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Assert,
    Query,
}

impl InputKind {
    /// The `input_type` value used in performance rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assert => "assert",
            Self::Query => "query",
        }
    }
}

/// Keyword heuristic: a trailing `?` or an interrogative opener means a
/// query, anything else is an assertion.
pub fn classify_keyword(text: &str) -> InputKind {
    let trimmed = text.trim();
    if trimmed.ends_with('?') {
        return InputKind::Query;
    }
    const QUERY_OPENERS: &[&str] = &[
        "what", "who", "where", "when", "which", "why", "how", "is", "are", "does", "do", "can",
        "did", "list",
    ];
    let first_word = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if QUERY_OPENERS.contains(&first_word.as_str()) {
        InputKind::Query
    } else {
        InputKind::Assert
    }
}

/// Strategy recommendation contract.
#[async_trait]
pub trait InputRouter: Send + Sync {
    /// Recommend a strategy hash for this input, or `None` to let the
    /// caller use its default.
    async fn route(&self, text: &str, llm_model_id: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trailing_question_mark() {
        assert_eq!(classify_keyword("The sky is blue?"), InputKind::Query);
        assert_eq!(classify_keyword("anything?  "), InputKind::Query);
    }

    #[test]
    fn test_interrogative_openers() {
        assert_eq!(classify_keyword("What color is the sky"), InputKind::Query);
        assert_eq!(classify_keyword("can tweety fly"), InputKind::Query);
        assert_eq!(classify_keyword("List all birds"), InputKind::Query);
    }

    #[test]
    fn test_statements_are_assertions() {
        assert_eq!(classify_keyword("The sky is blue."), InputKind::Assert);
        assert_eq!(classify_keyword("Tweety, a bird, flies."), InputKind::Assert);
        assert_eq!(classify_keyword(""), InputKind::Assert);
    }
}
