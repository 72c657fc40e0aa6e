//! Per-run execution records.
//!
//! One [`ExecutionRecord`] is written for every run that was not skipped,
//! whether it succeeded or failed.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Failed to write analytics to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode execution record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub task_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    pub provider: String,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Receives execution records.
#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), AnalyticsError>;
}

/// Appends records to a JSON lines file.
pub struct JsonlRecorder {
    path: PathBuf,
    /// Serializes appends from concurrent runs in this process
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AnalyticsError {
        AnalyticsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ExecutionRecorder for JsonlRecorder {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), AnalyticsError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        tracing::debug!("Recorded run {} of {}", record.run_id, record.task_name);
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct InMemoryRecorder {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Drop everything recorded so far.
    pub fn reset(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

#[async_trait]
impl ExecutionRecorder for InMemoryRecorder {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), AnalyticsError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str, success: bool) -> ExecutionRecord {
        ExecutionRecord {
            timestamp: Utc::now(),
            run_id: Uuid::new_v4(),
            task_name: task.to_string(),
            success,
            tokens_used: success.then_some(120),
            cost: success.then_some(0.002),
            provider: "openai:gpt-4o-mini".to_string(),
            execution_time_ms: 42,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[tokio::test]
    async fn test_jsonl_appends_one_line_per_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let recorder = JsonlRecorder::new(dir.path().join(".analytics/executions.jsonl"));

        let first = record("a", true);
        let second = record("b", false);
        recorder.record(&first).await.unwrap();
        recorder.record(&second).await.unwrap();

        let text = std::fs::read_to_string(recorder.path()).unwrap();
        let parsed: Vec<ExecutionRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, vec![first, second]);
        assert!(!text.lines().nth(1).unwrap().contains("tokens_used"));
    }

    #[tokio::test]
    async fn test_in_memory_reset() {
        let recorder = InMemoryRecorder::new();
        recorder.record(&record("a", true)).await.unwrap();
        assert_eq!(recorder.records().len(), 1);

        recorder.reset();
        assert!(recorder.records().is_empty());
    }
}
