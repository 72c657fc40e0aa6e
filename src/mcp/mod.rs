//! Tool calling: tool descriptions, executors and wire-format strategies.
//!
//! A [`ToolExecutor`] lists and runs tools. Two implementations ship:
//! [`ToolRegistry`] for in-process [`Tool`]s and [`McpClient`] for MCP servers
//! reachable over HTTP JSON-RPC. How a model *asks* for a tool depends on the
//! backend; that is the job of a [`ToolCallStrategy`].

pub mod client;
pub mod registry;
pub mod strategies;
mod types;

pub use client::McpClient;
pub use registry::{Tool, ToolRegistry};
pub use strategies::{select_strategy, ToolCallStrategy};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn succeeded(call: &ToolCall, output: String, elapsed: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: true,
            result: Some(output),
            error: None,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(call: &ToolCall, error: String, elapsed: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            result: None,
            error: Some(error),
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// Text shown to the model for this result.
    pub fn display_text(&self) -> &str {
        if self.success {
            self.result.as_deref().unwrap_or("")
        } else {
            self.error.as_deref().unwrap_or("unknown error")
        }
    }
}

/// Something that can list and run tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools currently available.
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>>;

    /// Run one call and return its text output.
    async fn execute(&self, call: &ToolCall) -> anyhow::Result<String>;
}

/// Run a call under a time budget; failures become a failed [`ToolResult`].
pub async fn execute_with_timeout(
    executor: &dyn ToolExecutor,
    call: &ToolCall,
    timeout: Duration,
) -> ToolResult {
    let start = Instant::now();
    match tokio::time::timeout(timeout, executor.execute(call)).await {
        Ok(Ok(output)) => {
            tracing::debug!("Tool {} completed in {:?}", call.name, start.elapsed());
            ToolResult::succeeded(call, output, start.elapsed())
        }
        Ok(Err(e)) => {
            tracing::warn!("Tool {} failed: {}", call.name, e);
            ToolResult::failed(call, e.to_string(), start.elapsed())
        }
        Err(_) => {
            tracing::warn!("Tool {} timed out after {:?}", call.name, timeout);
            ToolResult::failed(
                call,
                format!("Tool timed out after {}s", timeout.as_secs_f64()),
                start.elapsed(),
            )
        }
    }
}
