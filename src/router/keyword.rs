//! Keyword-classifying router.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::perf::PerformanceDb;

use super::{classify_keyword, InputRouter};

/// Classifies the input with the keyword heuristic, then asks the
/// performance database for the best-scoring strategy for that input type.
pub struct KeywordRouter {
    db: Arc<PerformanceDb>,
}

impl KeywordRouter {
    pub fn new(db: Arc<PerformanceDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InputRouter for KeywordRouter {
    async fn route(&self, text: &str, llm_model_id: &str) -> Option<String> {
        let kind = classify_keyword(text);
        match self.db.best_strategy(llm_model_id, kind.as_str()) {
            Ok(Some(score)) => {
                debug!(
                    input_type = kind.as_str(),
                    strategy_hash = %score.strategy_hash,
                    mean_score = score.mean_score,
                    "keyword router recommendation"
                );
                Some(score.strategy_hash)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "performance database lookup failed; routing declined");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_db() -> Arc<PerformanceDb> {
        let db = PerformanceDb::in_memory().unwrap();
        db.record_row(
            "assert-winner",
            None,
            "assert",
            &json!({"exactMatchProlog": true}),
            150,
            &json!({"total_tokens": 500}),
        )
        .unwrap();
        db.record_row(
            "query-winner",
            None,
            "query",
            &json!({"exactMatchAnswer": true}),
            150,
            &json!({"total_tokens": 500}),
        )
        .unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_routes_by_classified_kind() {
        let router = KeywordRouter::new(seeded_db());
        assert_eq!(
            router.route("The sky is blue.", "m").await.as_deref(),
            Some("assert-winner")
        );
        assert_eq!(
            router.route("What color is the sky?", "m").await.as_deref(),
            Some("query-winner")
        );
    }

    #[tokio::test]
    async fn test_empty_table_returns_none() {
        let router = KeywordRouter::new(Arc::new(PerformanceDb::in_memory().unwrap()));
        assert_eq!(router.route("The sky is blue.", "m").await, None);
    }
}
