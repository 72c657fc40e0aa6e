//! Provider identifiers and adapter construction.

use std::sync::Arc;
use std::time::Duration;

use super::{AnthropicBackend, CompletionOptions, LlmBackend, OpenAiBackend, ProviderAdapter};
use crate::config::{ConfigError, TaskConfig};
use crate::cost::pricing_for_model;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    OpenAi,
    OpenRouter,
    Ollama,
    DeepSeek,
    Groq,
    Anthropic,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::OpenAi,
        BackendKind::OpenRouter,
        BackendKind::Ollama,
        BackendKind::DeepSeek,
        BackendKind::Groq,
        BackendKind::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::OpenRouter => "openrouter",
            BackendKind::Ollama => "ollama",
            BackendKind::DeepSeek => "deepseek",
            BackendKind::Groq => "groq",
            BackendKind::Anthropic => "anthropic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Default API base URL.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "https://api.openai.com/v1",
            BackendKind::OpenRouter => "https://openrouter.ai/api/v1",
            BackendKind::Ollama => "http://localhost:11434/v1",
            BackendKind::DeepSeek => "https://api.deepseek.com/v1",
            BackendKind::Groq => "https://api.groq.com/openai/v1",
            BackendKind::Anthropic => "https://api.anthropic.com",
        }
    }

    /// Environment variable holding the API key, if the backend needs one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            BackendKind::OpenAi => Some("OPENAI_API_KEY"),
            BackendKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            BackendKind::Ollama => None,
            BackendKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            BackendKind::Groq => Some("GROQ_API_KEY"),
            BackendKind::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }

    /// Environment variable overriding the base URL.
    pub fn base_url_env(&self) -> String {
        format!("{}_BASE_URL", self.as_str().to_uppercase())
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `backend:model` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderId {
    pub backend: BackendKind,
    pub model: String,
}

impl ProviderId {
    /// Parse `backend:model`, splitting on the first colon only.
    ///
    /// Ollama tags like `ollama:llama3:8b` keep their colon in the model.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let (backend, model) = value
            .split_once(':')
            .map(|(b, m)| (b.trim(), m.trim()))
            .filter(|(b, m)| !b.is_empty() && !m.is_empty())
            .ok_or_else(|| ConfigError::InvalidProvider(value.to_string()))?;

        let backend = BackendKind::from_name(backend)
            .ok_or_else(|| ConfigError::UnknownBackend(backend.to_string()))?;

        Ok(Self {
            backend,
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.backend, self.model)
    }
}

/// Builds a ready-to-call adapter for a task.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, task: &TaskConfig) -> Result<ProviderAdapter, ConfigError>;
}

/// Factory for the real HTTP backends, configured from the environment.
#[derive(Debug, Clone, Default)]
pub struct HttpProviderFactory {
    client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn backend_for(&self, kind: BackendKind) -> Result<Arc<dyn LlmBackend>, ConfigError> {
        let api_key = match kind.api_key_env() {
            Some(var) => Some(
                std::env::var(var)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))?,
            ),
            None => None,
        };
        let base_url = std::env::var(kind.base_url_env())
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| kind.default_base_url().to_string());

        let backend: Arc<dyn LlmBackend> = match kind {
            BackendKind::Anthropic => Arc::new(AnthropicBackend::new(
                self.client.clone(),
                base_url,
                api_key.unwrap_or_default(),
            )),
            _ => Arc::new(OpenAiBackend::new(kind, self.client.clone(), base_url, api_key)),
        };
        Ok(backend)
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, task: &TaskConfig) -> Result<ProviderAdapter, ConfigError> {
        let id = ProviderId::parse(&task.provider)?;
        let backend = self.backend_for(id.backend)?;
        build_adapter(backend, id, task)
    }
}

/// Wrap a backend with the task's pricing, retry policy and options.
///
/// Pricing is resolved here so an unpriced model is rejected before any call.
pub fn build_adapter(
    backend: Arc<dyn LlmBackend>,
    id: ProviderId,
    task: &TaskConfig,
) -> Result<ProviderAdapter, ConfigError> {
    let pricing = match task.pricing {
        Some(pricing) => pricing,
        None => pricing_for_model(id.backend.as_str(), &id.model)?,
    };

    let options = CompletionOptions {
        temperature: task.options.temperature,
        max_tokens: task.options.max_tokens,
        system_prompt: task.options.system_prompt.clone(),
    };

    Ok(ProviderAdapter::new(backend, id, pricing)
        .with_retry(task.retry.clone())
        .with_options(options)
        .with_timeout(Duration::from_secs(task.options.timeout_secs)))
}
