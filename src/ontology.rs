//! Read-only ontology view.
//!
//! Ontologies are named, globally visible bags of clauses managed outside
//! the core. The pipeline borrows the current snapshot at the moment it
//! runs; management plumbing lives with the embedding host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::Result;

/// One ontology at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedOntology {
    pub name: String,
    pub text: String,
}

/// Supplies the global clause text the pipeline folds into its context.
#[async_trait]
pub trait OntologySource: Send + Sync {
    /// Current snapshot of every ontology, in a stable order.
    async fn snapshot(&self) -> Result<Vec<NamedOntology>>;
}

/// Concatenate a snapshot with labelled section separators.
pub fn render_snapshot(ontologies: &[NamedOntology]) -> String {
    let mut out = String::new();
    for ontology in ontologies {
        let text = ontology.text.trim();
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("% --- ontology: {} ---\n{text}\n", ontology.name));
    }
    out
}

/// Map-backed source for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryOntologies {
    ontologies: RwLock<BTreeMap<String, String>>,
}

impl MemoryOntologies {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, name: impl Into<String>, text: impl Into<String>) {
        self.ontologies
            .write()
            .await
            .insert(name.into(), text.into());
    }

    pub async fn remove(&self, name: &str) -> bool {
        self.ontologies.write().await.remove(name).is_some()
    }
}

#[async_trait]
impl OntologySource for MemoryOntologies {
    async fn snapshot(&self) -> Result<Vec<NamedOntology>> {
        Ok(self
            .ontologies
            .read()
            .await
            .iter()
            .map(|(name, text)| NamedOntology {
                name: name.clone(),
                text: text.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_snapshot_is_ordered_and_labelled() {
        let ontologies = MemoryOntologies::new();
        ontologies.put("zoo", "animal(lion).").await;
        ontologies.put("colors", "color(blue).").await;

        let snapshot = ontologies.snapshot().await.unwrap();
        let rendered = render_snapshot(&snapshot);
        assert_eq!(
            rendered,
            "% --- ontology: colors ---\ncolor(blue).\n\n% --- ontology: zoo ---\nanimal(lion).\n"
        );
    }

    #[tokio::test]
    async fn test_empty_ontologies_skipped() {
        let ontologies = MemoryOntologies::new();
        ontologies.put("blank", "   ").await;
        let rendered = render_snapshot(&ontologies.snapshot().await.unwrap());
        assert_eq!(rendered, "");
    }

    #[tokio::test]
    async fn test_remove() {
        let ontologies = MemoryOntologies::new();
        ontologies.put("x", "a(1).").await;
        assert!(ontologies.remove("x").await);
        assert!(!ontologies.remove("x").await);
        assert!(ontologies.snapshot().await.unwrap().is_empty());
    }
}
