//! Cost calculation from token usage and model pricing.
//!
//! Single source of truth for turning token usage into USD across all
//! backends. Lookups for unknown models fail instead of pricing at zero.

use serde::{Deserialize, Serialize};

use crate::llm::TokenUsage;

/// Model pricing in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per 1K uncached input tokens
    pub input: f64,
    /// Cost per 1K output tokens
    pub output: f64,
    /// Cost per 1K cache-read input tokens
    #[serde(default)]
    pub cached: f64,
}

impl ModelPricing {
    /// Pricing for backends that run locally.
    pub const FREE: ModelPricing = ModelPricing {
        input: 0.0,
        output: 0.0,
        cached: 0.0,
    };

    /// Build pricing from $ per 1M token rates, the unit providers publish.
    const fn per_million(input: f64, output: f64, cached: f64) -> Self {
        Self {
            input: input / 1000.0,
            output: output / 1000.0,
            cached: cached / 1000.0,
        }
    }

    /// Calculate the USD cost of the given usage.
    ///
    /// # Formula
    /// `(prompt/1000)*input + (completion/1000)*output + (cached/1000)*cached`
    ///
    /// # Postcondition
    /// `result >= 0` for non-negative prices
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let cached = usage.cached_tokens.unwrap_or(0);
        let cost = (usage.prompt_tokens as f64 / 1000.0) * self.input
            + (usage.completion_tokens as f64 / 1000.0) * self.output
            + (cached as f64 / 1000.0) * self.cached;
        cost.max(0.0)
    }

    /// Check that no rate is negative or non-finite.
    pub fn is_valid(&self) -> bool {
        [self.input, self.output, self.cached]
            .iter()
            .all(|p| p.is_finite() && *p >= 0.0)
    }
}

/// Pricing lookup errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CostError {
    #[error("No pricing known for model '{model}' on backend '{backend}'; add a `pricing` override to the task")]
    UnknownModel { backend: String, model: String },
}

/// Normalize model names to canonical form for pricing lookup.
fn normalize_model(model: &str) -> &str {
    let trimmed = model.trim();
    // OpenRouter-style ids carry a vendor prefix ("openai/gpt-4o-mini")
    let trimmed = trimmed.rsplit('/').next().unwrap_or(trimmed);

    match trimmed {
        // Claude models - normalize to base names
        s if s.contains("claude-3-5-sonnet") || s.contains("claude-3.5-sonnet") => {
            "claude-3-5-sonnet"
        }
        s if s.contains("claude-3-7-sonnet") || s.contains("claude-3.7-sonnet") => {
            "claude-3-5-sonnet"
        }
        s if s.contains("claude-sonnet-4") || s.contains("claude-4-sonnet") => "claude-sonnet-4",
        s if s.contains("claude-3-5-haiku") || s.contains("claude-3.5-haiku") => "claude-3-5-haiku",
        s if s.contains("claude-haiku-4") => "claude-haiku-4",
        s if s.contains("claude-3-haiku") => "claude-3-haiku",
        s if s.contains("claude-opus-4") || s.contains("claude-4-opus") => "claude-opus-4",
        s if s.contains("claude-3-opus") => "claude-opus-4",

        // GPT models
        s if s.contains("gpt-4o-mini") => "gpt-4o-mini",
        s if s.contains("gpt-4o") => "gpt-4o",
        s if s.contains("gpt-4.1-nano") => "gpt-4.1-nano",
        s if s.contains("gpt-4.1-mini") => "gpt-4.1-mini",
        s if s.contains("gpt-4.1") => "gpt-4.1",
        s if s.contains("gpt-4-turbo") => "gpt-4-turbo",
        s if s.contains("gpt-3.5-turbo") => "gpt-3.5-turbo",
        s if s.contains("o4-mini") => "o4-mini",
        s if s.contains("o3-mini") => "o3-mini",

        // DeepSeek
        s if s.contains("deepseek-reasoner") || s.contains("deepseek-r1") => "deepseek-reasoner",
        s if s.contains("deepseek-chat") || s.contains("deepseek-v3") => "deepseek-chat",

        // Llama models served by Groq
        s if s.contains("llama-3.1-8b") => "llama-3.1-8b",
        s if s.contains("llama-3.3-70b") => "llama-3.3-70b",

        // Gemini models
        s if s.contains("gemini-2.0-flash") || s.contains("gemini-2-0-flash") => "gemini-2.0-flash",
        s if s.contains("gemini-1.5-flash") || s.contains("gemini-1-5-flash") => "gemini-1.5-flash",

        // Return as-is if no alias found
        _ => trimmed,
    }
}

/// Get pricing for a backend/model pair.
///
/// Local backends are free; every other backend must have the model in the
/// table.
pub fn pricing_for_model(backend: &str, model: &str) -> Result<ModelPricing, CostError> {
    if backend.eq_ignore_ascii_case("ollama") {
        return Ok(ModelPricing::FREE);
    }

    // Rates in $ per 1M tokens (input, output, cache read)
    let pricing = match normalize_model(model) {
        "claude-3-5-sonnet" | "claude-sonnet-4" => ModelPricing::per_million(3.00, 15.00, 0.30),
        "claude-3-5-haiku" => ModelPricing::per_million(0.80, 4.00, 0.08),
        "claude-haiku-4" => ModelPricing::per_million(1.00, 5.00, 0.10),
        "claude-3-haiku" => ModelPricing::per_million(0.25, 1.25, 0.03),
        "claude-opus-4" => ModelPricing::per_million(15.00, 75.00, 1.50),

        "gpt-4o-mini" => ModelPricing::per_million(0.15, 0.60, 0.075),
        "gpt-4o" => ModelPricing::per_million(2.50, 10.00, 1.25),
        "gpt-4.1" => ModelPricing::per_million(2.00, 8.00, 0.50),
        "gpt-4.1-mini" => ModelPricing::per_million(0.40, 1.60, 0.10),
        "gpt-4.1-nano" => ModelPricing::per_million(0.10, 0.40, 0.025),
        "gpt-4-turbo" => ModelPricing::per_million(10.00, 30.00, 0.0),
        "gpt-3.5-turbo" => ModelPricing::per_million(0.50, 1.50, 0.0),
        "o4-mini" => ModelPricing::per_million(1.10, 4.40, 0.275),
        "o3-mini" => ModelPricing::per_million(1.10, 4.40, 0.55),

        "deepseek-chat" => ModelPricing::per_million(0.27, 1.10, 0.07),
        "deepseek-reasoner" => ModelPricing::per_million(0.55, 2.19, 0.14),

        "llama-3.1-8b" => ModelPricing::per_million(0.05, 0.08, 0.0),
        "llama-3.3-70b" => ModelPricing::per_million(0.59, 0.79, 0.0),

        "gemini-2.0-flash" => ModelPricing::per_million(0.10, 0.40, 0.025),
        "gemini-1.5-flash" => ModelPricing::per_million(0.075, 0.30, 0.0),

        _ => {
            return Err(CostError::UnknownModel {
                backend: backend.to_string(),
                model: model.to_string(),
            })
        }
    };

    Ok(pricing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_model() {
        assert_eq!(
            normalize_model("claude-3-5-sonnet-20241022"),
            "claude-3-5-sonnet"
        );
        assert_eq!(normalize_model("gpt-4o-2024-08-06"), "gpt-4o");
        assert_eq!(normalize_model("openai/gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(normalize_model("claude-sonnet-4-20250514"), "claude-sonnet-4");
        assert_eq!(normalize_model("gpt-4.1-mini-2025-04-14"), "gpt-4.1-mini");
    }

    #[test]
    fn test_pricing_for_known_models() {
        assert!(pricing_for_model("openai", "gpt-4o").is_ok());
        assert!(pricing_for_model("anthropic", "claude-3-5-haiku-latest").is_ok());
        assert!(pricing_for_model("openrouter", "anthropic/claude-sonnet-4").is_ok());
    }

    #[test]
    fn test_pricing_for_unknown_model_fails_closed() {
        let err = pricing_for_model("openai", "unknown-model-xyz").unwrap_err();
        assert!(err.to_string().contains("unknown-model-xyz"));
    }

    #[test]
    fn test_local_backend_is_free() {
        let pricing = pricing_for_model("ollama", "llama3:8b").unwrap();
        assert_eq!(pricing, ModelPricing::FREE);
    }

    #[test]
    fn test_cost_one_million_tokens_each() {
        // gpt-4o-mini: $0.15/1M input, $0.60/1M output
        let pricing = pricing_for_model("openai", "gpt-4o-mini").unwrap();
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        let cost = pricing.cost(&usage);
        assert!((cost - 0.75).abs() < 0.01, "cost was {}", cost);
    }

    #[test]
    fn test_cost_includes_cached_tokens() {
        let pricing = ModelPricing {
            input: 0.003,
            output: 0.015,
            cached: 0.0003,
        };
        let usage = TokenUsage::new(1000, 500).with_cached(10_000);
        // 0.003 + 0.0075 + 0.003
        assert!((pricing.cost(&usage) - 0.0135).abs() < 1e-9);
    }

    #[test]
    fn test_cost_zero_for_no_usage() {
        let pricing = pricing_for_model("openai", "gpt-4o").unwrap();
        assert_eq!(pricing.cost(&TokenUsage::default()), 0.0);
    }

    #[test]
    fn test_negative_rates_are_invalid() {
        let pricing = ModelPricing {
            input: -1.0,
            output: 0.0,
            cached: 0.0,
        };
        assert!(!pricing.is_valid());
        assert!(ModelPricing::FREE.is_valid());
    }
}
