//! Scripted backend and factory for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    build_adapter, BackendReply, CompletionOptions, LlmBackend, ProviderAdapter, ProviderError,
    ProviderErrorKind, ProviderFactory, ProviderId, TokenUsage,
};
use crate::config::{ConfigError, TaskConfig};

/// Backend that replays queued replies in order and records every request.
pub(crate) struct MockBackend {
    name: String,
    delay: Option<Duration>,
    replies: Mutex<VecDeque<Result<BackendReply, ProviderError>>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl MockBackend {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: None,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn push_reply(&self, content: &str, usage: TokenUsage) {
        self.replies.lock().unwrap().push_back(Ok(BackendReply {
            content: content.to_string(),
            usage,
            model: None,
            metadata: None,
        }));
    }

    pub(crate) fn push_error(&self, error: ProviderError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub(crate) fn system_prompts(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<BackendReply, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((prompt.to_string(), options.system_prompt.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ProviderError::new(
                ProviderErrorKind::Unknown,
                "no scripted reply left",
            ))
        })
    }
}

/// Factory handing out adapters over one shared [`MockBackend`].
pub(crate) struct MockFactory {
    pub(crate) backend: Arc<MockBackend>,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self {
            backend: Arc::new(MockBackend::new("openai")),
        }
    }
}

impl ProviderFactory for MockFactory {
    fn create(&self, task: &TaskConfig) -> Result<ProviderAdapter, ConfigError> {
        let id = ProviderId::parse(&task.provider)?;
        let adapter = build_adapter(self.backend.clone(), id, task)?;
        Ok(adapter.with_retry(super::RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }))
    }
}
