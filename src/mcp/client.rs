//! MCP client over HTTP JSON-RPC.
//!
//! Connects lazily: the first `list_tools` initializes every configured
//! server and records which server owns which tool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::*;
use super::{ToolCall, ToolDefinition, ToolExecutor};
use crate::config::McpServerSettings;

/// Tool executor backed by one or more MCP servers.
pub struct McpClient {
    servers: Vec<McpServerSettings>,
    client: reqwest::Client,
    /// Tool name -> index into `servers`
    routes: RwLock<HashMap<String, usize>>,
    /// Request ID counter for JSON-RPC
    request_id: AtomicU64,
}

impl McpClient {
    pub fn new(servers: Vec<McpServerSettings>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            servers,
            client,
            routes: RwLock::new(HashMap::new()),
            request_id: AtomicU64::new(1),
        }
    }

    /// Get the next request ID for JSON-RPC
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn server_label(server: &McpServerSettings) -> &str {
        server.name.as_deref().unwrap_or(&server.url)
    }

    fn post(&self, server: &McpServerSettings) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(server.url.trim_end_matches('/'))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        for (name, value) in &server.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    /// Send a JSON-RPC request to an MCP server
    async fn send_jsonrpc(
        &self,
        server: &McpServerSettings,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);

        let response = self.post(server).json(&request).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }

        let json_response: JsonRpcResponse = response.json().await?;

        if let Some(error) = json_response.error {
            anyhow::bail!("JSON-RPC error {}: {}", error.code, error.message);
        }

        json_response
            .result
            .ok_or_else(|| anyhow::anyhow!("No result in response"))
    }

    /// Initialize connection with an MCP server
    async fn initialize(&self, server: &McpServerSettings) -> anyhow::Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "cronagent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result = self
            .send_jsonrpc(server, "initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init_result: InitializeResult = serde_json::from_value(result)?;

        // Send initialized notification (no response expected, but some servers require it)
        let _ = self
            .post(server)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }))
            .send()
            .await;

        Ok(init_result)
    }

    async fn list_server_tools(
        &self,
        server: &McpServerSettings,
    ) -> anyhow::Result<Vec<ToolDefinition>> {
        let init = self.initialize(server).await?;
        tracing::debug!(
            "Connected to MCP server {} ({}, protocol {})",
            Self::server_label(server),
            init.server_info
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or("unnamed"),
            init.protocol_version
        );

        let result = self.send_jsonrpc(server, "tools/list", None).await?;
        let list: ToolsListResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }
}

#[async_trait]
impl ToolExecutor for McpClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut routes = HashMap::new();
        let mut last_error = None;

        for (index, server) in self.servers.iter().enumerate() {
            match self.list_server_tools(server).await {
                Ok(server_tools) => {
                    tracing::info!(
                        "MCP server {} exposes {} tools",
                        Self::server_label(server),
                        server_tools.len()
                    );
                    for tool in server_tools {
                        // First server wins on name clashes
                        if routes.contains_key(&tool.name) {
                            continue;
                        }
                        routes.insert(tool.name.clone(), index);
                        tools.push(tool);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "MCP server {} unavailable: {}",
                        Self::server_label(server),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if routes.is_empty() {
            if let Some(e) = last_error {
                return Err(e.context("No MCP server could be reached"));
            }
        }

        *self.routes.write().await = routes;
        Ok(tools)
    }

    async fn execute(&self, call: &ToolCall) -> anyhow::Result<String> {
        let index = self
            .routes
            .read()
            .await
            .get(&call.name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", call.name))?;
        let server = &self.servers[index];

        let params = serde_json::json!({
            "name": call.name,
            "arguments": call.arguments,
        });

        let result = self
            .send_jsonrpc(server, "tools/call", Some(params))
            .await
            .map_err(|e| anyhow::anyhow!("Tool call failed: {}", e))?;

        let response: CallToolResult = serde_json::from_value(result)?;
        for item in &response.content {
            if item.content_type != "text" {
                tracing::debug!("Ignoring {} content from tool {}", item.content_type, call.name);
            }
        }

        if response.is_error {
            anyhow::bail!("Tool error: {}", response.text());
        }
        Ok(response.text())
    }
}
