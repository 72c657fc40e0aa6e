//! OpenAI-compatible chat completions backend.
//!
//! Serves `openai`, `openrouter`, `ollama`, `deepseek` and `groq`, which all
//! expose `POST {base}/chat/completions`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::error_from_response;
use super::{BackendKind, BackendReply, CompletionOptions, LlmBackend, ProviderError, TokenUsage};

/// Single-attempt client for an OpenAI-compatible endpoint.
pub struct OpenAiBackend {
    kind: BackendKind,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(kind: BackendKind, client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            kind,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<BackendReply, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        tracing::debug!("Sending request to {}: model={}", self.kind, model);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        if self.kind == BackendKind::OpenRouter {
            builder = builder.header("X-Title", "cronagent");
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(
                super::ProviderErrorKind::ProviderInternal,
                format!("Failed to parse response: {}", e),
            )
            .with_source(e)
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                super::ProviderErrorKind::ProviderInternal,
                "No choices in response",
            )
        })?;

        let text = choice.message.content.unwrap_or_default();
        let content = match choice.message.tool_calls {
            // Native tool calls are rendered in the function-call wire format
            Some(calls) if !calls.is_empty() => serde_json::json!({
                "content": text,
                "tool_calls": calls,
            })
            .to_string(),
            _ => text,
        };

        let usage = parsed
            .usage
            .map(|u| {
                let cached = u
                    .prompt_tokens_details
                    .and_then(|d| d.cached_tokens)
                    .unwrap_or(0)
                    .min(u.prompt_tokens);
                TokenUsage::new(u.prompt_tokens - cached, u.completion_tokens).with_cached(cached)
            })
            .unwrap_or_default();

        let metadata = choice
            .finish_reason
            .map(|reason| serde_json::json!({ "finish_reason": reason }));

        Ok(BackendReply {
            content,
            usage,
            model: parsed.model,
            metadata,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> OpenAiBackend {
        OpenAiBackend::new(
            BackendKind::OpenAi,
            Client::new(),
            format!("{}/v1/", server.uri()),
            Some("sk-test".to_string()),
        )
    }

    #[tokio::test]
    async fn test_complete_parses_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"message": {"content": "hi there"}, "finish_reason": "stop"}],
                "usage": {
                    "prompt_tokens": 100,
                    "completion_tokens": 20,
                    "total_tokens": 120,
                    "prompt_tokens_details": {"cached_tokens": 40}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = backend(&server)
            .complete("gpt-4o-mini", "hello", &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.content, "hi there");
        assert_eq!(reply.model.as_deref(), Some("gpt-4o-mini-2024-07-18"));
        assert_eq!(reply.usage.prompt_tokens, 60);
        assert_eq!(reply.usage.cached_tokens, Some(40));
        assert_eq!(reply.usage.total_tokens, 120);
    }

    #[tokio::test]
    async fn test_native_tool_calls_are_rendered_into_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let reply = backend(&server)
            .complete("gpt-4o", "find", &CompletionOptions::default())
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&reply.content).unwrap();
        assert_eq!(value["tool_calls"][0]["function"]["name"], "search");
    }

    #[tokio::test]
    async fn test_http_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(serde_json::json!({"error": {"message": "Rate limit reached"}})),
            )
            .mount(&server)
            .await;

        let error = backend(&server)
            .complete("gpt-4o", "hello", &CompletionOptions::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ProviderErrorKind::RateLimit);
        assert_eq!(error.status_code, Some(429));
        assert_eq!(error.retry_after, Some(std::time::Duration::from_secs(7)));
        assert_eq!(error.message, "Rate limit reached");
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let error = backend(&server)
            .complete("gpt-4o", "hello", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Auth);
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let backend = OpenAiBackend::new(
            BackendKind::Ollama,
            Client::new(),
            "http://127.0.0.1:1".to_string(),
            None,
        );
        let error = backend
            .complete("llama3", "hello", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Network);
    }
}
