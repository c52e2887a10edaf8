//! LLM gateway: provider abstraction plus timeout and cost accounting.
//!
//! The rest of the crate never talks to a provider directly. The
//! [`LlmGateway`] applies the configured per-call timeout, rejects empty
//! completions, and records usage into the caller's [`CostTracker`] so
//! partial cost survives downstream failures.

mod client;
mod types;

pub use client::{AnthropicProvider, LlmProvider, OpenAiProvider, ProviderConfig};
pub use types::{
    pricing_for, CostTracker, GenerateRequest, Generation, ModelCosts, ModelPricing, TokenUsage,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Provider wrapper used by the strategy executor and the coordinator.
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// The model id requests run under when they carry no override.
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Generate text and record its cost into `costs`.
    ///
    /// An empty (or whitespace-only) completion is an error: translation
    /// nodes cannot do anything useful with it.
    pub async fn generate(
        &self,
        request: GenerateRequest,
        costs: &mut CostTracker,
    ) -> Result<Generation> {
        let provider = self.provider.name();
        let generation = tokio::time::timeout(self.timeout, self.provider.generate(request))
            .await
            .map_err(|_| {
                Error::llm_request(
                    provider,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                )
            })??;

        costs.record_generation(&generation);
        debug!(
            provider,
            model = %generation.model,
            input_tokens = generation.usage.input_tokens,
            output_tokens = generation.usage.output_tokens,
            "llm generation complete"
        );

        if generation.text.trim().is_empty() {
            return Err(Error::LlmEmptyResponse);
        }
        Ok(generation)
    }

    /// Embed texts under the same timeout policy.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::timeout(self.timeout, self.provider.embed(texts))
            .await
            .map_err(|_| {
                Error::EmbeddingService(format!(
                    "embedding timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider shared by unit and scenario tests.

    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider that replays a scripted queue of responses.
    pub struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
        model: String,
        pub embeddings: Option<Vec<Vec<f32>>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                model: "scripted-model".to_string(),
                embeddings: None,
            }
        }

        pub fn with_embeddings(mut self, embeddings: Vec<Vec<f32>>) -> Self {
            self.embeddings = Some(embeddings);
            self
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, _request: GenerateRequest) -> Result<Generation> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::llm_request("scripted", "script exhausted"))?;
            Ok(Generation {
                text,
                model: self.model.clone(),
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                cost: Some(0.001),
                timestamp: Utc::now(),
            })
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            match &self.embeddings {
                Some(vectors) => Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| vectors[i % vectors.len()].clone())
                    .collect()),
                None => Err(Error::EmbeddingService("no embeddings scripted".into())),
            }
        }

        fn model_id(&self) -> &str {
            &self.model
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;

    #[tokio::test]
    async fn test_gateway_records_cost() {
        let gateway = LlmGateway::new(
            Arc::new(ScriptedProvider::new(vec!["hello"])),
            Duration::from_secs(5),
        );
        let mut costs = CostTracker::new();
        let generation = gateway
            .generate(GenerateRequest::new("s", "u"), &mut costs)
            .await
            .unwrap();

        assert_eq!(generation.text, "hello");
        assert_eq!(costs.request_count, 1);
        assert_eq!(costs.total_input_tokens, 10);
        assert!(costs.total_cost > 0.0);
    }

    #[tokio::test]
    async fn test_gateway_rejects_empty_response() {
        let gateway = LlmGateway::new(
            Arc::new(ScriptedProvider::new(vec!["   \n"])),
            Duration::from_secs(5),
        );
        let mut costs = CostTracker::new();
        let err = gateway
            .generate(GenerateRequest::new("s", "u"), &mut costs)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LlmEmptyResponse));
        // cost of the empty call is still recorded
        assert_eq!(costs.request_count, 1);
    }

    #[tokio::test]
    async fn test_gateway_embed_passthrough_error() {
        let gateway = LlmGateway::new(
            Arc::new(ScriptedProvider::new(vec![])),
            Duration::from_secs(5),
        );
        let err = gateway.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(_)));
    }
}
