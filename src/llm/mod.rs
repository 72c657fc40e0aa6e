//! LLM provider abstraction.
//!
//! A [`ProviderAdapter`] wraps one single-attempt [`LlmBackend`] and adds the
//! behaviour every task needs: per-attempt timeouts, retry with jittered
//! backoff, and cost accounting. Backends only know how to speak their wire
//! protocol.

pub mod anthropic;
mod error;
pub mod factory;
pub mod openai;
mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use anthropic::AnthropicBackend;
pub use error::{classify_http_status, ProviderError, ProviderErrorKind};
pub use factory::{build_adapter, BackendKind, HttpProviderFactory, ProviderFactory, ProviderId};
pub use openai::OpenAiBackend;
pub use retry::{retry_with_backoff, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cost::ModelPricing;

/// Token usage reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Uncached input tokens
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Input tokens served from the provider's prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            cached_tokens: None,
        }
    }

    /// Record cache-read tokens; they count towards the total.
    pub fn with_cached(mut self, cached_tokens: u64) -> Self {
        if cached_tokens > 0 {
            self.total_tokens = self
                .prompt_tokens
                .saturating_add(self.completion_tokens)
                .saturating_add(cached_tokens);
            self.cached_tokens = Some(cached_tokens);
        }
        self
    }

    /// Add another usage record into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cached_tokens = match (self.cached_tokens, other.cached_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };
    }
}

/// Optional parameters for a completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Maximum output tokens to generate.
    pub max_tokens: Option<u64>,
    /// System message sent ahead of the prompt.
    pub system_prompt: Option<String>,
}

/// Raw result of a single backend attempt.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub content: String,
    pub usage: TokenUsage,
    /// Model name echoed by the backend, if any
    pub model: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// A single-attempt LLM backend.
///
/// Implementations must not retry; [`ProviderAdapter`] owns retry policy.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend identifier, e.g. `openai`.
    fn name(&self) -> &str;

    /// Send one prompt and return the reply or a classified error.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<BackendReply, ProviderError>;
}

/// Normalized response from a provider call.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    /// USD cost of this call
    pub cost: f64,
    /// Provider identifier (`backend:model`)
    pub provider: String,
    /// Whether any input was served from the prompt cache
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Default per-attempt time budget.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Resilient, cost-aware wrapper around one backend and model.
#[derive(Clone)]
pub struct ProviderAdapter {
    backend: Arc<dyn LlmBackend>,
    id: ProviderId,
    pricing: ModelPricing,
    retry: RetryPolicy,
    options: CompletionOptions,
    timeout: Duration,
}

impl ProviderAdapter {
    pub fn new(backend: Arc<dyn LlmBackend>, id: ProviderId, pricing: ModelPricing) -> Self {
        Self {
            backend,
            id,
            pricing,
            retry: RetryPolicy::default(),
            options: CompletionOptions::default(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn pricing(&self) -> &ModelPricing {
        &self.pricing
    }

    /// Send a prompt using the task's completion options.
    pub async fn call(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        self.call_with(prompt, &self.options).await
    }

    /// Send a prompt with a system message, keeping the other task options.
    ///
    /// Used for the secondary calls (dedup checks, memory extraction).
    pub async fn call_with_system(
        &self,
        prompt: &str,
        system_prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let options = CompletionOptions {
            system_prompt: Some(system_prompt.to_string()),
            ..self.options.clone()
        };
        self.call_with(prompt, &options).await
    }

    /// Send a prompt with explicit options.
    pub async fn call_with(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let label = format!("{} call", self.id);
        tracing::debug!(
            "Calling {} (prompt: {} chars, timeout: {:?})",
            self.id,
            prompt.len(),
            self.timeout
        );

        let reply = retry_with_backoff(&self.retry, &label, |attempt| async move {
            if attempt > 0 {
                tracing::debug!("{} attempt {}", self.id, attempt + 1);
            }
            match tokio::time::timeout(
                self.timeout,
                self.backend.complete(&self.id.model, prompt, options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(self.timeout)),
            }
        })
        .await?;

        let cost = self.pricing.cost(&reply.usage);
        let cached = reply.usage.cached_tokens.map_or(false, |c| c > 0);

        tracing::debug!(
            "{} returned {} chars ({} tokens, ${:.6})",
            self.id,
            reply.content.len(),
            reply.usage.total_tokens,
            cost
        );

        Ok(ProviderResponse {
            content: reply.content,
            usage: reply.usage,
            model: reply.model.unwrap_or_else(|| self.id.model.clone()),
            cost,
            provider: self.id.to_string(),
            cached,
            metadata: reply.metadata,
        })
    }
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("backend", &self.backend.name())
            .field("id", &self.id)
            .field("pricing", &self.pricing)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockBackend;
    use super::*;

    fn adapter(backend: Arc<MockBackend>) -> ProviderAdapter {
        let id = ProviderId::parse("openai:gpt-4o-mini").unwrap();
        let pricing = crate::cost::pricing_for_model("openai", "gpt-4o-mini").unwrap();
        ProviderAdapter::new(backend, id, pricing).with_retry(RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_usage_accumulate() {
        let mut total = TokenUsage::new(10, 5);
        total.accumulate(&TokenUsage::new(1, 2).with_cached(3));
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens, 21);
        assert_eq!(total.cached_tokens, Some(3));
    }

    #[tokio::test]
    async fn test_call_computes_cost_and_provider() {
        let backend = Arc::new(MockBackend::new("openai"));
        backend.push_reply("hello", TokenUsage::new(1_000_000, 1_000_000));

        let response = adapter(backend.clone()).call("hi").await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.provider, "openai:gpt-4o-mini");
        assert_eq!(response.model, "gpt-4o-mini");
        assert!((response.cost - 0.75).abs() < 0.01);
        assert!(!response.cached);
        assert_eq!(backend.prompts(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_call_retries_exactly_max_attempts() {
        let backend = Arc::new(MockBackend::new("openai"));
        for _ in 0..5 {
            backend.push_error(ProviderError::from_status(429, "rate limited", None));
        }

        let error = adapter(backend.clone()).call("hi").await.unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::RateLimit);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_call_recovers_from_transient_error() {
        let backend = Arc::new(MockBackend::new("openai"));
        backend.push_error(ProviderError::network("connection reset"));
        backend.push_reply("ok", TokenUsage::new(10, 10));

        let response = adapter(backend.clone()).call("hi").await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let backend = Arc::new(MockBackend::new("openai"));
        backend.push_error(ProviderError::from_status(401, "bad key", None));
        backend.push_reply("never", TokenUsage::new(1, 1));

        let error = adapter(backend.clone()).call("hi").await.unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Auth);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_network_error() {
        let backend = Arc::new(MockBackend::new("openai").with_delay(Duration::from_millis(200)));
        backend.push_reply("late", TokenUsage::new(1, 1));

        let error = adapter(backend)
            .with_retry(RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            })
            .with_timeout(Duration::from_millis(20))
            .call("hi")
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Network);
    }

    #[tokio::test]
    async fn test_system_prompt_is_forwarded() {
        let backend = Arc::new(MockBackend::new("openai"));
        backend.push_reply("ok", TokenUsage::new(1, 1));

        adapter(backend.clone())
            .call_with_system("question", "be terse")
            .await
            .unwrap();
        assert_eq!(backend.system_prompts(), vec![Some("be terse".to_string())]);
    }
}
