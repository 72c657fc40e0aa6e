//! Anthropic messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::error_from_response;
use super::{
    BackendReply, CompletionOptions, LlmBackend, ProviderError, ProviderErrorKind, TokenUsage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct AnthropicBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicBackend {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<BackendReply, ProviderError> {
        let request = MessagesRequest {
            model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: options.system_prompt.as_deref(),
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
        };

        tracing::debug!("Sending request to anthropic: model={}", model);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::ProviderInternal,
                format!("Failed to parse response: {}", e),
            )
            .with_source(e)
        })?;

        let has_tool_use = parsed
            .content
            .iter()
            .any(|block| block.get("type").and_then(|t| t.as_str()) == Some("tool_use"));

        let content = if has_tool_use {
            // Keep the blocks intact for the content-block strategy
            serde_json::json!({ "content": parsed.content }).to_string()
        } else {
            parsed
                .content
                .iter()
                .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        };

        let usage = parsed
            .usage
            .map(|u| {
                TokenUsage::new(u.input_tokens, u.output_tokens)
                    .with_cached(u.cache_read_input_tokens.unwrap_or(0))
            })
            .unwrap_or_default();

        let metadata = parsed
            .stop_reason
            .map(|reason| serde_json::json!({ "stop_reason": reason }));

        Ok(BackendReply {
            content,
            usage,
            model: parsed.model,
            metadata,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<serde_json::Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> AnthropicBackend {
        AnthropicBackend::new(Client::new(), server.uri(), "ak-test".to_string())
    }

    #[tokio::test]
    async fn test_complete_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({
                "max_tokens": 4096,
                "system": "be brief"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-3-5-haiku-20241022",
                "content": [
                    {"type": "text", "text": "Hello, "},
                    {"type": "text", "text": "world"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 3, "cache_read_input_tokens": 100}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let options = CompletionOptions {
            system_prompt: Some("be brief".to_string()),
            ..Default::default()
        };
        let reply = backend(&server)
            .complete("claude-3-5-haiku-latest", "hi", &options)
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello, world");
        assert_eq!(reply.usage.prompt_tokens, 12);
        assert_eq!(reply.usage.cached_tokens, Some(100));
        assert_eq!(reply.usage.total_tokens, 115);
    }

    #[tokio::test]
    async fn test_tool_use_blocks_are_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo"}}
                ],
                "usage": {"input_tokens": 5, "output_tokens": 5}
            })))
            .mount(&server)
            .await;

        let reply = backend(&server)
            .complete("claude-sonnet-4", "weather?", &CompletionOptions::default())
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&reply.content).unwrap();
        assert_eq!(value["content"][1]["name"], "weather");
    }

    #[tokio::test]
    async fn test_overloaded_is_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let error = backend(&server)
            .complete("claude-sonnet-4", "hi", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::RateLimit);
        assert_eq!(error.message, "Overloaded");
    }
}
