use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::StateError;
use crate::analytics::AnalyticsError;
use crate::config::ConfigError;
use crate::llm::{ProviderError, TokenUsage};
use crate::mcp::ToolResult;
use crate::memory::MemoryError;
use crate::output::OutputError;

/// Token usage by purpose.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageBreakdown {
    /// Primary call plus every tool-loop follow-up
    pub primary: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<TokenUsage>,
}

impl UsageBreakdown {
    pub fn total(&self) -> TokenUsage {
        let mut total = self.primary.clone();
        for secondary in [&self.dedup, &self.memory].into_iter().flatten() {
            total.accumulate(secondary);
        }
        total
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task_name: String,
    pub run_id: Uuid,
    pub provider: String,
    pub model: String,
    pub response: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub execution_time_ms: u64,
    pub outputs_created: Vec<String>,
    pub memory_updated: bool,
    pub tool_calls: Vec<ToolResult>,
    pub usage: UsageBreakdown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Skipped { task_name: String, reason: String },
    Completed(RunReport),
}

impl RunOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped { .. })
    }
}

/// The underlying cause of a failed run.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Error)]
#[error("Task '{task}' failed while {message}: {source}")]
pub struct TaskRunnerError {
    pub task: String,
    pub message: String,
    #[source]
    pub source: RunFailure,
}
