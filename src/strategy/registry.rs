//! Strategy registry: id and hash lookup plus base-id resolution.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::prompt;

use super::types::{Operation, Strategy, StrategyNode};

/// Holds strategy definitions keyed by id and by content hash. Built once
/// at startup and read-only afterwards; strategies are shared across
/// requests.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    by_id: HashMap<String, Arc<Strategy>>,
    by_hash: HashMap<String, Arc<Strategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in translation strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for strategy in builtin_strategies() {
            registry
                .register(strategy)
                .expect("built-in strategies have unique ids");
        }
        registry
    }

    /// Add a strategy. Ids and hashes must be unique.
    pub fn register(&mut self, strategy: Strategy) -> Result<()> {
        if self.by_id.contains_key(&strategy.id) {
            return Err(Error::InvalidInput(format!(
                "strategy `{}` is already registered",
                strategy.id
            )));
        }
        let strategy = Arc::new(strategy);
        self.by_hash
            .insert(strategy.hash().to_string(), Arc::clone(&strategy));
        self.by_id.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Strategy>> {
        self.by_id.get(id).cloned()
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<Arc<Strategy>> {
        self.by_hash.get(hash).cloned()
    }

    /// Resolve `base` for `operation`: first `{base}-{op}`, then the bare
    /// base id (accepted only when its operation matches).
    pub fn resolve(&self, base: &str, operation: Operation) -> Option<Arc<Strategy>> {
        let suffixed = format!("{base}-{}", operation.suffix());
        if let Some(strategy) = self.get(&suffixed) {
            return Some(strategy);
        }
        self.get(base).filter(|s| s.operation == operation)
    }

    /// Whether `base` names any registered strategy, directly or through an
    /// operation variant. Used when clients set a per-session override.
    pub fn knows_base(&self, base: &str) -> bool {
        self.by_id.contains_key(base)
            || self
                .by_id
                .contains_key(&format!("{base}-{}", Operation::Assert.suffix()))
            || self
                .by_id
                .contains_key(&format!("{base}-{}", Operation::Query.suffix()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn context_bindings(names: &[&str]) -> std::collections::BTreeMap<String, String> {
    names
        .iter()
        .map(|name| (name.to_string(), name.to_string()))
        .collect()
}

const ASSERT_INPUTS: &[&str] = &[
    "naturalLanguageText",
    "existingFacts",
    "ontologyRules",
    "lexiconSummary",
];

const QUERY_INPUTS: &[&str] = &[
    "naturalLanguageQuestion",
    "existingFacts",
    "ontologyRules",
    "lexiconSummary",
];

fn sir_assert_strategy(id: &str, name: &str, prompt_name: &str) -> Strategy {
    Strategy::new(
        id,
        name,
        Operation::Assert,
        vec![
            StrategyNode::LlmCall {
                prompt_name: prompt_name.to_string(),
                input_bindings: context_bindings(ASSERT_INPUTS),
                output_name: "sirText".to_string(),
            },
            StrategyNode::ParseJson {
                input: "sirText".to_string(),
                output_name: "sirRecords".to_string(),
                schema_tag: Some("sir".to_string()),
            },
            StrategyNode::SirTransform {
                input: "sirRecords".to_string(),
                output_name: "clauses".to_string(),
            },
            StrategyNode::ValidateClauses {
                input: "clauses".to_string(),
            },
            StrategyNode::Return {
                input: "clauses".to_string(),
            },
        ],
    )
}

fn query_strategy(id: &str, name: &str, prompt_name: &str) -> Strategy {
    Strategy::new(
        id,
        name,
        Operation::Query,
        vec![
            StrategyNode::LlmCall {
                prompt_name: prompt_name.to_string(),
                input_bindings: context_bindings(QUERY_INPUTS),
                output_name: "queryText".to_string(),
            },
            StrategyNode::Return {
                input: "queryText".to_string(),
            },
        ],
    )
}

/// The built-in strategy catalog: a direct clause translation, the SIR
/// pipeline, and a few-shot SIR variant.
pub fn builtin_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new(
            "Direct-Assert",
            "Direct clause translation",
            Operation::Assert,
            vec![
                StrategyNode::LlmCall {
                    prompt_name: prompt::NL_TO_CLAUSES_DIRECT.to_string(),
                    input_bindings: context_bindings(ASSERT_INPUTS),
                    output_name: "clauseText".to_string(),
                },
                StrategyNode::ParseJson {
                    input: "clauseText".to_string(),
                    output_name: "clauses".to_string(),
                    schema_tag: Some("clause_array".to_string()),
                },
                StrategyNode::ValidateClauses {
                    input: "clauses".to_string(),
                },
                StrategyNode::Return {
                    input: "clauses".to_string(),
                },
            ],
        ),
        query_strategy("Direct-Query", "Direct query translation", prompt::NL_TO_QUERY),
        sir_assert_strategy(
            "SIR-R1-Assert",
            "SIR single-round assertion",
            prompt::NL_TO_SIR_ASSERT,
        ),
        query_strategy("SIR-R1-Query", "SIR single-round query", prompt::NL_TO_QUERY),
        sir_assert_strategy(
            "SIR-R2-FewShot-Assert",
            "SIR few-shot assertion",
            prompt::NL_TO_SIR_ASSERT_FEWSHOT,
        ),
        query_strategy(
            "SIR-R2-FewShot-Query",
            "SIR few-shot query",
            prompt::NL_TO_QUERY_FEWSHOT,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_cover_both_operations() {
        let registry = StrategyRegistry::with_defaults();
        for base in ["Direct", "SIR-R1", "SIR-R2-FewShot"] {
            let assert = registry.resolve(base, Operation::Assert).unwrap();
            let query = registry.resolve(base, Operation::Query).unwrap();
            assert_eq!(assert.operation, Operation::Assert);
            assert_eq!(query.operation, Operation::Query);
        }
    }

    #[test]
    fn test_resolve_prefers_suffixed_id() {
        let registry = StrategyRegistry::with_defaults();
        let strategy = registry.resolve("SIR-R1", Operation::Assert).unwrap();
        assert_eq!(strategy.id, "SIR-R1-Assert");
    }

    #[test]
    fn test_resolve_accepts_bare_id_with_matching_operation() {
        let mut registry = StrategyRegistry::empty();
        registry
            .register(Strategy::new(
                "Solo",
                "bare strategy",
                Operation::Assert,
                vec![StrategyNode::Return {
                    input: "clauses".to_string(),
                }],
            ))
            .unwrap();

        assert!(registry.resolve("Solo", Operation::Assert).is_some());
        // wrong operation: the bare id does not satisfy a query resolution
        assert!(registry.resolve("Solo", Operation::Query).is_none());
    }

    #[test]
    fn test_hash_lookup() {
        let registry = StrategyRegistry::with_defaults();
        let strategy = registry.get("SIR-R1-Assert").unwrap();
        let by_hash = registry.get_by_hash(strategy.hash()).unwrap();
        assert_eq!(by_hash.id, "SIR-R1-Assert");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = StrategyRegistry::with_defaults();
        let err = registry
            .register(builtin_strategies().remove(0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_knows_base() {
        let registry = StrategyRegistry::with_defaults();
        assert!(registry.knows_base("SIR-R2-FewShot"));
        assert!(registry.knows_base("SIR-R1-Assert"));
        assert!(!registry.knows_base("Nonexistent"));
    }
}
