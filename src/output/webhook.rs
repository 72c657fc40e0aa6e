use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{OutputError, OutputSink, TaskResult};
use crate::util::truncate_chars;

/// POSTs the result as JSON.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: String, headers: BTreeMap<String, String>) -> Self {
        Self {
            client,
            url,
            headers,
        }
    }

    fn failure(&self, message: String) -> OutputError {
        OutputError::Webhook {
            url: self.url.clone(),
            message,
        }
    }
}

#[async_trait]
impl OutputSink for WebhookSink {
    fn describe(&self) -> String {
        format!("webhook:{}", self.url)
    }

    async fn execute(&self, result: &TaskResult) -> Result<Option<String>, OutputError> {
        let mut request = self.client.post(&self.url).json(result);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_chars(&body, 200)
            )));
        }

        tracing::info!("Delivered {} to webhook {}", result.task_name, self.url);
        Ok(None)
    }
}
