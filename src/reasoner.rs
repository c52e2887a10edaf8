//! Reasoner gateway and clause validator.
//!
//! The gateway owns the boundary with the symbolic engine: it enforces that
//! every string sent down ends in a period, applies the configured timeout,
//! and sorts engine failures into the three codes callers care about —
//! validation failures (`INVALID_GENERATED_PROLOG`), bad query strings
//! (`PROLOG_QUERY_SYNTAX`), and runtime faults (`REASONER_ERROR`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logic::{self, SolveLimits, Term};

/// Structured result of a query run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Solutions {
    /// Ground query: provable or not
    Truth(bool),
    /// One binding record per solution, in derivation order; empty means
    /// no solution
    Bindings(Vec<BTreeMap<String, Value>>),
}

impl Solutions {
    /// Whether the query succeeded at least once.
    pub fn any(&self) -> bool {
        match self {
            Self::Truth(t) => *t,
            Self::Bindings(records) => !records.is_empty(),
        }
    }
}

/// Outcome of validating a single clause. Validation never has side effects
/// on any knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClauseCheck {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// The engine contract the gateway is generic over.
#[async_trait]
pub trait ReasonerBackend: Send + Sync {
    /// Load `program` and report the first syntax error, if any. Must not
    /// retain any state.
    async fn check_program(&self, program: &str) -> Result<()>;

    /// Load `kb` and run `query` against it.
    async fn solve(&self, kb: &str, query: &str) -> Result<Solutions>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// The crate's default backend: the built-in resolution engine.
pub struct BuiltinReasoner {
    limits: SolveLimits,
}

impl BuiltinReasoner {
    pub fn new() -> Self {
        Self {
            limits: SolveLimits::default(),
        }
    }

    pub fn with_limits(limits: SolveLimits) -> Self {
        Self { limits }
    }
}

impl Default for BuiltinReasoner {
    fn default() -> Self {
        Self::new()
    }
}

fn term_to_value(term: &Term) -> Value {
    match term {
        Term::Atom(name) => Value::String(name.clone()),
        Term::Int(n) => Value::from(*n),
        Term::Float(x) => serde_json::Number::from_f64(*x)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(x.to_string())),
        Term::Str(s) => Value::String(s.clone()),
        Term::List(items, None) => Value::Array(items.iter().map(term_to_value).collect()),
        // partial lists, variables, compounds: fall back to text form
        other => Value::String(other.to_string()),
    }
}

#[async_trait]
impl ReasonerBackend for BuiltinReasoner {
    async fn check_program(&self, program: &str) -> Result<()> {
        logic::parse_program(program)
            .map(|_| ())
            .map_err(|e| Error::PrologQuerySyntax {
                query: program.to_string(),
                diagnostic: e.to_string(),
            })
    }

    async fn solve(&self, kb: &str, query: &str) -> Result<Solutions> {
        let program = logic::parse_program(kb)
            .map_err(|e| Error::Reasoner(format!("knowledge base failed to load: {e}")))?;
        let goals = logic::parse_query(query).map_err(|e| Error::PrologQuerySyntax {
            query: query.to_string(),
            diagnostic: e.to_string(),
        })?;

        let raw = logic::solve(&program, &goals, self.limits)
            .map_err(|e| Error::Reasoner(e.to_string()))?;

        let ground = goals.iter().all(Term::is_ground);
        if ground {
            return Ok(Solutions::Truth(!raw.is_empty()));
        }

        let projected = logic::project_solutions(&goals, &raw);
        let records = projected
            .into_iter()
            .map(|bindings| {
                bindings
                    .into_iter()
                    .map(|(name, term)| (name, term_to_value(&term)))
                    .collect::<BTreeMap<_, _>>()
            })
            .collect();
        Ok(Solutions::Bindings(records))
    }

    fn name(&self) -> &'static str {
        "builtin"
    }
}

/// Timeout- and error-mapping wrapper around a [`ReasonerBackend`].
pub struct ReasonerGateway {
    backend: Arc<dyn ReasonerBackend>,
    timeout: Duration,
}

impl ReasonerGateway {
    pub fn new(backend: Arc<dyn ReasonerBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            Error::Reasoner(format!(
                "{} timed out after {}ms",
                self.backend.name(),
                self.timeout.as_millis()
            ))
        })?
    }

    /// Syntax-check a single clause by loading it as a one-clause program.
    pub async fn validate_clause(&self, clause: &str) -> Result<ClauseCheck> {
        let clause = clause.trim();
        if clause.is_empty() {
            return Ok(ClauseCheck::invalid("empty clause"));
        }
        let program = if clause.ends_with('.') {
            clause.to_string()
        } else {
            format!("{clause}.")
        };

        match self.with_timeout(self.backend.check_program(&program)).await {
            Ok(()) => Ok(ClauseCheck::ok()),
            Err(Error::PrologQuerySyntax { diagnostic, .. }) => {
                Ok(ClauseCheck::invalid(diagnostic))
            }
            Err(other) => Err(other),
        }
    }

    /// Validate a batch, failing on the first invalid clause.
    pub async fn validate_all(&self, clauses: &[String]) -> Result<()> {
        for clause in clauses {
            let check = self.validate_clause(clause).await?;
            if !check.valid {
                return Err(Error::InvalidGeneratedProlog {
                    clause: clause.clone(),
                    diagnostic: check.error.unwrap_or_else(|| "syntax error".to_string()),
                });
            }
        }
        Ok(())
    }

    /// Run a query against a knowledge base text.
    pub async fn execute_query(&self, kb: &str, query: &str) -> Result<Solutions> {
        let query = query.trim();
        let query = if query.ends_with('.') {
            query.to_string()
        } else {
            format!("{query}.")
        };
        self.with_timeout(self.backend.solve(kb, &query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gateway() -> ReasonerGateway {
        ReasonerGateway::new(Arc::new(BuiltinReasoner::new()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_validate_accepts_well_formed_clause() {
        let check = gateway().validate_clause("is_color(sky, blue).").await.unwrap();
        assert!(check.valid);
        assert!(check.error.is_none());
    }

    #[tokio::test]
    async fn test_validate_appends_missing_period() {
        let check = gateway().validate_clause("bird(tweety)").await.unwrap();
        assert!(check.valid);
    }

    #[tokio::test]
    async fn test_validate_reports_syntax_error() {
        let check = gateway().validate_clause("is_color(sky blue).").await.unwrap();
        assert!(!check.valid);
        assert!(check.error.is_some());
    }

    #[tokio::test]
    async fn test_validate_all_stops_at_first_failure() {
        let clauses = vec![
            "a(1).".to_string(),
            "broken(".to_string(),
            "c(3).".to_string(),
        ];
        let err = gateway().validate_all(&clauses).await.unwrap_err();
        match err {
            Error::InvalidGeneratedProlog { clause, .. } => assert_eq!(clause, "broken("),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_query_bindings() {
        let solutions = gateway()
            .execute_query("is_color(sky, blue).", "is_color(sky, X).")
            .await
            .unwrap();
        match solutions {
            Solutions::Bindings(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].get("X"), Some(&Value::String("blue".into())));
            }
            other => panic!("expected bindings, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_ground_query_is_truth() {
        let gw = gateway();
        let yes = gw
            .execute_query("bird(tweety).", "bird(tweety).")
            .await
            .unwrap();
        assert_eq!(yes, Solutions::Truth(true));
        assert!(yes.any());

        let no = gw
            .execute_query("bird(tweety).", "bird(felix).")
            .await
            .unwrap();
        assert_eq!(no, Solutions::Truth(false));
    }

    #[tokio::test]
    async fn test_empty_kb_yields_no_solutions() {
        let solutions = gateway()
            .execute_query("% --- session ---\n", "bird(X).")
            .await
            .unwrap();
        assert_eq!(solutions, Solutions::Bindings(vec![]));
        assert!(!solutions.any());
    }

    #[tokio::test]
    async fn test_query_syntax_error_is_typed() {
        let err = gateway()
            .execute_query("bird(tweety).", "bird(")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PrologQuerySyntax { .. }));
    }

    #[tokio::test]
    async fn test_runtime_fault_maps_to_reasoner_error() {
        let gw = ReasonerGateway::new(
            Arc::new(BuiltinReasoner::with_limits(SolveLimits {
                max_steps: 100,
                max_solutions: 4,
            })),
            Duration::from_secs(5),
        );
        let err = gw
            .execute_query("loop(X) :- loop(X).", "loop(a).")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reasoner(_)));
    }

    #[tokio::test]
    async fn test_solutions_json_shape() {
        let solutions = gateway()
            .execute_query(
                "likes(mary, wine). likes(mary, code).",
                "likes(mary, X).",
            )
            .await
            .unwrap();
        let json = serde_json::to_value(&solutions).unwrap();
        assert_eq!(json, serde_json::json!([{"X": "wine"}, {"X": "code"}]));
    }
}
