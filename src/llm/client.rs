//! LLM provider trait and HTTP adapter implementations.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{pricing_for, GenerateRequest, Generation, ModelPricing, TokenUsage};

/// Provider contract the pipeline depends on.
///
/// `generate` takes a (system, user) prompt pair and returns text plus cost
/// data. `embed` powers the semantic router; providers without an embedding
/// API return [`Error::EmbeddingService`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a prompt pair.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation>;

    /// Embed texts into vectors.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The model id used when a request carries no override.
    fn model_id(&self) -> &str;

    /// Provider name for logs and error messages.
    fn name(&self) -> &'static str;
}

/// Configuration for HTTP-backed providers.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key
    pub api_key: String,
    /// Default model
    pub model: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

// ==================== Anthropic ====================

/// Anthropic Claude provider.
pub struct AnthropicProvider {
    config: ProviderConfig,
    http: Client,
    pricing: Vec<ModelPricing>,
}

impl AnthropicProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ProviderConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self {
            config,
            http,
            pricing: vec![
                ModelPricing::new("claude-3-opus", 15.0, 75.0),
                ModelPricing::new("claude-3-5-sonnet", 3.0, 15.0),
                ModelPricing::new("claude-3-5-haiku", 0.8, 4.0),
            ],
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let model = request.model.unwrap_or_else(|| self.config.model.clone());

        let api_request = AnthropicRequest {
            model: model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.user,
            }],
            max_tokens: request.max_tokens.unwrap_or(4096),
            system: (!request.system.is_empty()).then_some(request.system),
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_request("anthropic", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_request("anthropic", format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::llm_request(
                    "anthropic",
                    format!("{}: {}", error.error.error_type, error.error.message),
                ));
            }
            return Err(Error::llm_request("anthropic", format!("{status}: {body}")));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_request("anthropic", format!("Failed to parse response: {e}")))?;

        let text = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = TokenUsage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        };
        let cost = pricing_for(&self.pricing, &model).map(|p| p.calculate_cost(&usage));

        Ok(Generation {
            text,
            model: api_response.model,
            usage,
            cost,
            timestamp: Utc::now(),
        })
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // No native embedding API; the semantic router needs a different provider.
        Err(Error::EmbeddingService(
            "anthropic does not provide an embedding API".to_string(),
        ))
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

// ==================== OpenAI ====================

/// OpenAI provider with chat completions and embeddings.
pub struct OpenAiProvider {
    config: ProviderConfig,
    http: Client,
    pricing: Vec<ModelPricing>,
}

impl OpenAiProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    const EMBEDDING_MODEL: &'static str = "text-embedding-3-small";

    pub fn new(config: ProviderConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self {
            config,
            http,
            pricing: vec![
                ModelPricing::new("gpt-4o-mini", 0.15, 0.60),
                ModelPricing::new("gpt-4o", 2.5, 10.0),
            ],
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn decode_error(status: reqwest::StatusCode, body: &str) -> Error {
        if let Ok(error) = serde_json::from_str::<OpenAiError>(body) {
            return Error::llm_request("openai", error.error.message);
        }
        Error::llm_request("openai", format!("{status}: {body}"))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let model = request.model.unwrap_or_else(|| self.config.model.clone());

        let mut messages = Vec::new();
        if !request.system.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: request.system,
            });
        }
        messages.push(OpenAiMessage {
            role: "user".to_string(),
            content: request.user,
        });

        let api_request = OpenAiRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_request("openai", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_request("openai", format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::decode_error(status, &body));
        }

        let api_response: OpenAiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_request("openai", format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm_request("openai", "no choices in response"))?;

        let usage = TokenUsage {
            input_tokens: api_response.usage.prompt_tokens,
            output_tokens: api_response.usage.completion_tokens,
        };
        let cost = pricing_for(&self.pricing, &model).map(|p| p.calculate_cost(&usage));

        Ok(Generation {
            text: choice.message.content,
            model: api_response.model,
            usage,
            cost,
            timestamp: Utc::now(),
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_request = OpenAiEmbeddingRequest {
            model: Self::EMBEDDING_MODEL.to_string(),
            input: texts.to_vec(),
        };

        let url = format!("{}/v1/embeddings", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingService(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::EmbeddingService(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Error::EmbeddingService(format!("{status}: {body}")));
        }

        let api_response: OpenAiEmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| Error::EmbeddingService(format!("Failed to parse response: {e}")))?;

        Ok(api_response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
