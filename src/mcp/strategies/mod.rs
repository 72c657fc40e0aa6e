//! Tool-call wire conventions.
//!
//! Each strategy knows how to advertise tools inside a prompt, find the calls
//! a model made in its reply, and fold tool results into the next prompt.
//! Malformed candidates are skipped, never fatal.

mod content_block;
mod function_call;
mod generic;

pub use content_block::ContentBlockStrategy;
pub use function_call::FunctionCallStrategy;
pub use generic::GenericStrategy;

use serde_json::{Map, Value};

use super::{ToolCall, ToolDefinition, ToolResult};

/// A tool-calling wire convention.
pub trait ToolCallStrategy: Send + Sync {
    /// Canonical strategy name.
    fn name(&self) -> &'static str;

    /// Augment `prompt` with tool descriptions and calling instructions.
    fn create_tool_prompt(&self, prompt: &str, tools: &[ToolDefinition]) -> String;

    /// Cheap presence check run before [`extract_tool_calls`](Self::extract_tool_calls).
    ///
    /// May report calls that then fail to parse; never misses a parseable one.
    fn has_tool_calls(&self, text: &str) -> bool {
        !self.extract_tool_calls(text).is_empty()
    }

    /// Every well-formed call in `text`, in order of appearance.
    fn extract_tool_calls(&self, text: &str) -> Vec<ToolCall>;

    /// Build the follow-up prompt carrying tool results.
    fn format_tool_results(
        &self,
        results: &[ToolResult],
        original_prompt: &str,
        prior_response: &str,
    ) -> String;
}

/// Resolve a strategy by name or alias.
pub fn strategy_by_name(name: &str) -> Option<Box<dyn ToolCallStrategy>> {
    match name.trim().to_lowercase().as_str() {
        "function_call" | "function" | "openai" => Some(Box::new(FunctionCallStrategy)),
        "content_block" | "anthropic" => Some(Box::new(ContentBlockStrategy)),
        "generic" | "xml" => Some(Box::new(GenericStrategy)),
        _ => None,
    }
}

/// Pick the strategy for a backend; an explicit override wins.
pub fn select_strategy(backend: &str, override_name: Option<&str>) -> Box<dyn ToolCallStrategy> {
    if let Some(name) = override_name {
        match strategy_by_name(name) {
            Some(strategy) => return strategy,
            None => tracing::warn!(
                "Unknown tool strategy '{}', falling back to the {} default",
                name,
                backend
            ),
        }
    }

    match backend.trim().to_lowercase().as_str() {
        "openai" | "openrouter" | "deepseek" | "groq" => Box::new(FunctionCallStrategy),
        "anthropic" => Box::new(ContentBlockStrategy),
        _ => Box::new(GenericStrategy),
    }
}

/// Appended when the tool-call cap is reached.
pub const FINAL_ANSWER_INSTRUCTION: &str =
    "Tool call limit reached. Provide your final answer now without requesting further tools.";

/// Bullet list of tools with their argument schemas.
pub(crate) fn describe_tools(tools: &[ToolDefinition]) -> String {
    tools
        .iter()
        .map(|tool| {
            let schema = if tool.input_schema.is_null() {
                "{}".to_string()
            } else {
                tool.input_schema.to_string()
            };
            format!(
                "- {}: {}\n  Arguments schema: {}",
                tool.name, tool.description, schema
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize call arguments.
///
/// Accepts an object, a JSON-encoded object string, an empty string or
/// null. Anything else is malformed.
pub(crate) fn parse_arguments(value: Option<&Value>) -> Option<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Some(Map::new()),
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::String(s)) if s.trim().is_empty() => Some(Map::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        Some(_) => None,
    }
}

/// Non-empty string field.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Explicit id, or a deterministic positional one.
pub(crate) fn call_id(explicit: Option<&str>, position: usize) -> String {
    explicit
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", position + 1))
}

/// Shared layout for follow-up prompts.
pub(crate) fn continuation_prompt(
    original_prompt: &str,
    prior_response: &str,
    rendered_results: &str,
    instructions: &str,
) -> String {
    format!(
        "{original_prompt}\n\n## Your previous response\n\n{prior_response}\n\n## Tool results\n\n{rendered_results}\n\n{instructions}"
    )
}
