//! Strategy definitions: content-addressed DAGs of translation nodes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// What a strategy produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Produces an ordered sequence of clause strings
    Assert,
    /// Produces a single query string
    Query,
}

impl Operation {
    /// Suffix appended to base ids (`{base}-Assert`, `{base}-Query`).
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Assert => "Assert",
            Self::Query => "Query",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// One node of a strategy DAG.
///
/// Nodes read named values from the shared pipeline context and write
/// exactly one new name each. Bindings use `BTreeMap` so the serialized
/// form, and therefore the content hash, is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyNode {
    /// Fill a registered prompt from context values and call the LLM.
    LlmCall {
        prompt_name: String,
        /// placeholder name -> context name
        input_bindings: BTreeMap<String, String>,
        output_name: String,
    },
    /// Parse a context string as JSON, tolerating ```json fences.
    ParseJson {
        input: String,
        output_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_tag: Option<String>,
    },
    /// Map a SIR record array to clause strings.
    SirTransform { input: String, output_name: String },
    /// Validate each clause via the reasoner; abort on the first failure.
    ValidateClauses { input: String },
    /// Designate the pipeline's result value.
    Return { input: String },
}

impl StrategyNode {
    /// The context name this node writes, if it writes one.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Self::LlmCall { output_name, .. }
            | Self::ParseJson { output_name, .. }
            | Self::SirTransform { output_name, .. } => Some(output_name),
            Self::ValidateClauses { .. } | Self::Return { .. } => None,
        }
    }
}

/// A named, immutable, content-addressed strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub operation: Operation,
    pub nodes: Vec<StrategyNode>,
    /// Fingerprint of the full definition; primary key in the performance
    /// database. Computed, never supplied.
    hash: String,
}

impl Strategy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        operation: Operation,
        nodes: Vec<StrategyNode>,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        let hash = content_hash(&id, &name, operation, &nodes);
        Self {
            id,
            name,
            operation,
            nodes,
            hash,
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Stable fingerprint over the canonical JSON of the definition.
fn content_hash(id: &str, name: &str, operation: Operation, nodes: &[StrategyNode]) -> String {
    #[derive(Serialize)]
    struct Canonical<'a> {
        id: &'a str,
        name: &'a str,
        operation: Operation,
        nodes: &'a [StrategyNode],
    }

    let canonical = serde_json::to_vec(&Canonical {
        id,
        name,
        operation,
        nodes,
    })
    .expect("strategy definitions serialize");

    let digest = Sha256::digest(&canonical);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bindings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample(id: &str) -> Strategy {
        Strategy::new(
            id,
            "sample",
            Operation::Assert,
            vec![
                StrategyNode::LlmCall {
                    prompt_name: "P".into(),
                    input_bindings: bindings(&[("text", "naturalLanguageText")]),
                    output_name: "raw".into(),
                },
                StrategyNode::Return { input: "raw".into() },
            ],
        )
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(sample("A").hash(), sample("A").hash());
        assert_eq!(sample("A").hash().len(), 64);
    }

    #[test]
    fn test_hash_depends_on_definition() {
        assert_ne!(sample("A").hash(), sample("B").hash());

        let reordered = Strategy::new(
            "A",
            "sample",
            Operation::Assert,
            vec![
                StrategyNode::Return { input: "raw".into() },
                StrategyNode::LlmCall {
                    prompt_name: "P".into(),
                    input_bindings: bindings(&[("text", "naturalLanguageText")]),
                    output_name: "raw".into(),
                },
            ],
        );
        assert_ne!(sample("A").hash(), reordered.hash());
    }

    #[test]
    fn test_hash_survives_serde_round_trip() {
        let strategy = sample("A");
        let json = serde_json::to_string(&strategy).unwrap();
        let back: Strategy = serde_json::from_str(&json).unwrap();
        assert_eq!(strategy.hash(), back.hash());
        assert_eq!(strategy, back);
    }

    #[test]
    fn test_operation_suffix() {
        assert_eq!(Operation::Assert.suffix(), "Assert");
        assert_eq!(Operation::Query.to_string(), "Query");
    }

    #[test]
    fn test_output_names() {
        let nodes = sample("A").nodes;
        assert_eq!(nodes[0].output_name(), Some("raw"));
        assert_eq!(nodes[1].output_name(), None);
    }
}
