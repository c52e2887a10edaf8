//! LLM request, response, and cost-accounting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single prompt-pair generation request.
///
/// The pipeline always speaks in (system, user) pairs; conversation history
/// is out of scope for translation calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
    /// Model override (defaults to the provider's configured model)
    pub model: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 1.0)
    pub temperature: Option<f64>,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text (may be empty; callers decide whether that is an error)
    pub text: String,
    /// Model that produced it
    pub model: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Cost in USD, when the pricing table knows the model
    pub cost: Option<f64>,
    /// Response timestamp
    pub timestamp: DateTime<Utc>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-model pricing, USD per million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_cost_per_m: f64,
    pub output_cost_per_m: f64,
}

impl ModelPricing {
    pub fn new(model: impl Into<String>, input_cost_per_m: f64, output_cost_per_m: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_m,
            output_cost_per_m,
        }
    }

    /// Calculate cost for given token usage.
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let input = (usage.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output = (usage.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input + output
    }
}

/// Look up pricing for a model id by exact then prefix match.
pub fn pricing_for<'a>(table: &'a [ModelPricing], model: &str) -> Option<&'a ModelPricing> {
    table
        .iter()
        .find(|p| model == p.model)
        .or_else(|| table.iter().find(|p| model.starts_with(&p.model)))
}

/// Costs for a specific model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

/// Cost accumulator threaded through one pipeline run (or one service call).
///
/// Every failure path preserves whatever was recorded before the failure, so
/// the structured error result can report partial cost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    /// Total input tokens
    pub total_input_tokens: u64,
    /// Total output tokens
    pub total_output_tokens: u64,
    /// Total cost in USD
    pub total_cost: f64,
    /// Number of requests
    pub request_count: u64,
    /// Per-model breakdown
    pub by_model: HashMap<String, ModelCosts>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from a generation.
    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost: Option<f64>) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.request_count += 1;
        if let Some(c) = cost {
            self.total_cost += c;
        }

        let model_costs = self.by_model.entry(model.to_string()).or_default();
        model_costs.input_tokens += usage.input_tokens;
        model_costs.output_tokens += usage.output_tokens;
        model_costs.request_count += 1;
        if let Some(c) = cost {
            model_costs.cost += c;
        }
    }

    /// Record a whole generation.
    pub fn record_generation(&mut self, generation: &Generation) {
        self.record(&generation.model, &generation.usage, generation.cost);
    }

    /// Merge another tracker into this one.
    pub fn merge(&mut self, other: &CostTracker) {
        self.total_input_tokens += other.total_input_tokens;
        self.total_output_tokens += other.total_output_tokens;
        self.total_cost += other.total_cost;
        self.request_count += other.request_count;

        for (model, costs) in &other.by_model {
            let entry = self.by_model.entry(model.clone()).or_default();
            entry.input_tokens += costs.input_tokens;
            entry.output_tokens += costs.output_tokens;
            entry.cost += costs.cost;
            entry.request_count += costs.request_count;
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_builder() {
        let req = GenerateRequest::new("sys", "user")
            .with_model("claude-3-5-haiku-20241022")
            .with_max_tokens(1000)
            .with_temperature(1.7);

        assert_eq!(req.system, "sys");
        assert_eq!(req.model.as_deref(), Some("claude-3-5-haiku-20241022"));
        assert_eq!(req.max_tokens, Some(1000));
        // temperature clamps into [0, 1]
        assert_eq!(req.temperature, Some(1.0));
    }

    #[test]
    fn test_pricing_calculation() {
        let pricing = ModelPricing::new("claude-3-5-sonnet", 3.0, 15.0);
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        };
        // 1M * $3/M + 0.5M * $15/M = $10.5
        assert!((pricing.calculate_cost(&usage) - 10.5).abs() < 0.01);
    }

    #[test]
    fn test_pricing_prefers_exact_match() {
        let table = vec![
            ModelPricing::new("gpt-4o", 2.5, 10.0),
            ModelPricing::new("gpt-4o-mini", 0.15, 0.60),
        ];
        assert_eq!(pricing_for(&table, "gpt-4o-mini").unwrap().model, "gpt-4o-mini");
        assert_eq!(pricing_for(&table, "gpt-4o-2024-08-06").unwrap().model, "gpt-4o");
        assert!(pricing_for(&table, "claude-3-5-sonnet").is_none());
    }

    #[test]
    fn test_cost_tracker_record_and_merge() {
        let mut a = CostTracker::new();
        a.record(
            "m1",
            &TokenUsage {
                input_tokens: 1000,
                output_tokens: 500,
            },
            Some(0.01),
        );

        let mut b = CostTracker::new();
        b.record(
            "m1",
            &TokenUsage {
                input_tokens: 2000,
                output_tokens: 1000,
            },
            Some(0.02),
        );
        b.record(
            "m2",
            &TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            None,
        );

        a.merge(&b);
        assert_eq!(a.total_input_tokens, 3010);
        assert_eq!(a.total_output_tokens, 1505);
        assert_eq!(a.request_count, 3);
        assert!((a.total_cost - 0.03).abs() < 1e-9);
        assert_eq!(a.by_model.get("m1").unwrap().request_count, 2);
        assert_eq!(a.by_model.get("m2").unwrap().request_count, 1);
    }
}
