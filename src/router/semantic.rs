//! Semantic router: archetype classification via embeddings.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::LlmGateway;
use crate::perf::PerformanceDb;

use super::{classify_keyword, InputRouter};

/// A class of inputs, described in natural language for embedding.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub id: &'static str,
    pub description: &'static str,
}

/// The fixed archetype catalog.
pub fn archetype_catalog() -> Vec<Archetype> {
    vec![
        Archetype {
            id: "fact_statement",
            description: "A declarative statement of a simple fact about an entity, such as \
                          an attribute or a property it has.",
        },
        Archetype {
            id: "rule_statement",
            description: "A general statement describing a conditional relationship or a rule \
                          that holds for all members of a class.",
        },
        Archetype {
            id: "taxonomy_statement",
            description: "A statement placing an individual into a class or a class into a \
                          broader class, such as X is a Y.",
        },
        Archetype {
            id: "relationship_statement",
            description: "A statement relating two entities through an action or association.",
        },
        Archetype {
            id: "composition_statement",
            description: "A statement describing what something is made of or what parts it \
                          contains.",
        },
        Archetype {
            id: "attribute_query",
            description: "A question asking for the value of an attribute of a specific \
                          entity, such as its color, size, or age.",
        },
        Archetype {
            id: "relationship_query",
            description: "A question asking whether or how two entities are related.",
        },
        Archetype {
            id: "existence_query",
            description: "A yes/no question asking whether something exists or whether a fact \
                          holds.",
        },
        Archetype {
            id: "definition_request",
            description: "A request to define a term or explain what a concept means.",
        },
    ]
}

/// Cosine similarity clamped to [-1, 1]; zero-magnitude vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Embeds the archetype catalog once, then classifies inputs by cosine
/// similarity and keys the performance lookup by archetype id.
pub struct SemanticRouter {
    db: Arc<PerformanceDb>,
    llm: Arc<LlmGateway>,
    catalog: Vec<Archetype>,
    embeddings: OnceCell<Vec<Vec<f32>>>,
}

impl SemanticRouter {
    pub fn new(db: Arc<PerformanceDb>, llm: Arc<LlmGateway>) -> Self {
        Self {
            db,
            llm,
            catalog: archetype_catalog(),
            embeddings: OnceCell::new(),
        }
    }

    async fn archetype_embeddings(&self) -> Result<&Vec<Vec<f32>>> {
        self.embeddings
            .get_or_try_init(|| async {
                let texts: Vec<String> = self
                    .catalog
                    .iter()
                    .map(|a| a.description.to_string())
                    .collect();
                self.llm.embed(&texts).await
            })
            .await
    }

    /// Pick the archetype most similar to the input.
    async fn classify(&self, text: &str) -> Result<&'static str> {
        let cached = self.archetype_embeddings().await?;
        let input = self.llm.embed(&[text.to_string()]).await?;
        let input = input
            .first()
            .ok_or_else(|| crate::error::Error::EmbeddingService("empty embedding".into()))?;

        let mut best = self.catalog[0].id;
        let mut best_score = f32::MIN;
        for (archetype, embedding) in self.catalog.iter().zip(cached) {
            let score = cosine_similarity(input, embedding);
            if score > best_score {
                best = archetype.id;
                best_score = score;
            }
        }
        debug!(archetype = best, similarity = best_score, "semantic classification");
        Ok(best)
    }
}

#[async_trait]
impl InputRouter for SemanticRouter {
    async fn route(&self, text: &str, llm_model_id: &str) -> Option<String> {
        let input_type = match self.classify(text).await {
            Ok(id) => id.to_string(),
            Err(e) => {
                // degrade to the keyword heuristic when embeddings are down
                warn!(error = %e, "embedding failed; falling back to keyword classification");
                classify_keyword(text).as_str().to_string()
            }
        };

        match self.db.best_strategy(llm_model_id, &input_type) {
            Ok(Some(score)) => Some(score.strategy_hash),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "performance database lookup failed; routing declined");
                None
            }
        }
    }
}
