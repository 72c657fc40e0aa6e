//! Output sinks for finished runs.

mod file;
mod webhook;

pub use file::FileSink;
pub use webhook::WebhookSink;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{OutputDescriptor, TaskConfig};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize task result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Webhook {url} failed: {message}")]
    Webhook { url: String, message: String },
}

/// Provider details attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub provider: String,
    pub model: String,
    pub tokens: u64,
    pub cost: f64,
    pub response_time_ms: u64,
}

/// What a sink receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response: String,
    pub metadata: ResultMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Destination for a finished result.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Deliver the result; returns the created location when there is one.
    async fn execute(&self, result: &TaskResult) -> Result<Option<String>, OutputError>;
}

/// One sink per configured output descriptor, in declaration order.
pub fn build_sinks(task: &TaskConfig, client: &reqwest::Client) -> Vec<Box<dyn OutputSink>> {
    task.outputs
        .iter()
        .map(|descriptor| -> Box<dyn OutputSink> {
            match descriptor {
                OutputDescriptor::File { path, format } => {
                    Box::new(FileSink::new(path.clone(), *format, task.task_dir.clone()))
                }
                OutputDescriptor::Webhook { url, headers } => {
                    Box::new(WebhookSink::new(client.clone(), url.clone(), headers.clone()))
                }
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn sample_result() -> TaskResult {
    use chrono::TimeZone;

    TaskResult {
        task_name: "daily-digest".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        success: true,
        response: "# Digest\n\nNothing new.".to_string(),
        metadata: ResultMetadata {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            tokens: 150,
            cost: 0.000045,
            response_time_ms: 812,
        },
        error: None,
    }
}
