//! Sessions and the session store contract.
//!
//! A session owns an ordered clause list (insertion order preserved,
//! duplicates permitted, every element period-terminated) plus an optional
//! per-session strategy override. The store is the sole writer of session
//! state; the coordinator only mutates sessions through it.

mod file;
mod memory;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::logic;

/// One client session. Serializes with camelCase keys; this is the on-disk
/// document layout of the file store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub clauses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_strategy_id: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            clauses: Vec::new(),
            active_strategy_id: None,
        }
    }

    /// Derived: always agrees with the clause sequence.
    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// All clauses joined by newlines.
    pub fn knowledge_base(&self) -> String {
        self.clauses.join("\n")
    }

    /// Structural summary of the predicate names and arities the session's
    /// clauses use. Rebuilt from the current clauses on each call.
    pub fn lexicon_summary(&self) -> String {
        let mut indicators: BTreeSet<String> = BTreeSet::new();
        for clause_text in &self.clauses {
            let Ok(clause) = logic::parse_clause(clause_text) else {
                continue;
            };
            if let Some((name, arity)) = clause.head.indicator() {
                indicators.insert(format!("{name}/{arity}"));
            }
            for goal in &clause.body {
                collect_goal_indicators(goal, &mut indicators);
            }
        }

        if indicators.is_empty() {
            "(no predicates defined)".to_string()
        } else {
            let list: Vec<String> = indicators.into_iter().collect();
            format!("Predicates in use: {}", list.join(", "))
        }
    }
}

fn collect_goal_indicators(goal: &logic::Term, out: &mut BTreeSet<String>) {
    match goal.indicator() {
        Some(("\\+", 1)) => {
            if let logic::Term::Compound(_, args) = goal {
                collect_goal_indicators(&args[0], out);
            }
        }
        Some(("=", 2)) | Some(("\\=", 2)) | Some(("true", 0)) | Some(("fail", 0)) => {}
        Some((name, arity)) => {
            out.insert(format!("{name}/{arity}"));
        }
        None => {}
    }
}

/// Validate a client-suggested session id. Generated ids always pass.
pub(crate) fn check_session_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "session id `{id}` must be 1-128 characters from [A-Za-z0-9._-]"
        )))
    }
}

/// Ownership and persistence of per-session clause sets.
///
/// `list_sessions` and the active-strategy pair are negotiable
/// capabilities: implementations without them return
/// [`Error::NotImplemented`] and callers degrade to system defaults.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session with the suggested id, or a generated one.
    async fn create_session(&self, id: Option<String>) -> Result<Session>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Remove a session; returns whether it existed.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Err(Error::NotImplemented(
            "this session store does not enumerate sessions".to_string(),
        ))
    }

    /// All clauses joined by newlines, or `None` for an unknown session.
    async fn knowledge_base(&self, id: &str) -> Result<Option<String>>;

    /// Atomic all-or-nothing append. For durable stores the batch is
    /// persisted before this returns.
    async fn add_clauses(&self, id: &str, clauses: &[String]) -> Result<()>;

    async fn lexicon_summary(&self, id: &str) -> Result<Option<String>>;

    async fn active_strategy(&self, id: &str) -> Result<Option<String>>;

    async fn set_active_strategy(&self, id: &str, strategy_id: &str) -> Result<()>;

    /// Whether `set_active_strategy` is supported.
    fn supports_strategy_override(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clause_count_tracks_clauses() {
        let mut session = Session::new("s");
        assert_eq!(session.clause_count(), 0);
        session.clauses.push("bird(tweety).".to_string());
        session.clauses.push("bird(tweety).".to_string()); // duplicates allowed
        assert_eq!(session.clause_count(), 2);
    }

    #[test]
    fn test_knowledge_base_join() {
        let mut session = Session::new("s");
        session.clauses.push("a(1).".to_string());
        session.clauses.push("b(2).".to_string());
        assert_eq!(session.knowledge_base(), "a(1).\nb(2).");
    }

    #[test]
    fn test_lexicon_summary_collects_head_and_body() {
        let mut session = Session::new("s");
        session.clauses.push("bird(tweety).".to_string());
        session
            .clauses
            .push("can_fly(X) :- bird(X), \\+ penguin(X).".to_string());
        assert_eq!(
            session.lexicon_summary(),
            "Predicates in use: bird/1, can_fly/1, penguin/1"
        );
    }

    #[test]
    fn test_lexicon_summary_empty() {
        assert_eq!(Session::new("s").lexicon_summary(), "(no predicates defined)");
    }

    #[test]
    fn test_session_id_validation() {
        assert!(check_session_id("abc-123_x.y").is_ok());
        assert!(check_session_id("").is_err());
        assert!(check_session_id("../escape").is_err());
        assert!(check_session_id("has space").is_err());
    }

    #[test]
    fn test_session_serde_round_trip() {
        let mut session = Session::new("s1");
        session.clauses.push("a(1).".to_string());
        session.active_strategy_id = Some("SIR-R1".to_string());

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "s1");
        assert_eq!(back.clauses, session.clauses);
        assert_eq!(back.active_strategy_id.as_deref(), Some("SIR-R1"));
    }
}
