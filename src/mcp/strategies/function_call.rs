//! OpenAI-style function calling.
//!
//! Recognises `{"tool_calls": [{"id", "type": "function", "function": {"name", "arguments"}}]}`
//! and the legacy `{"function_call": {"name", "arguments"}}`.

use serde_json::{json, Value};

use super::{
    call_id, continuation_prompt, describe_tools, parse_arguments, str_field, ToolCallStrategy,
};
use crate::mcp::{ToolCall, ToolDefinition, ToolResult};
use crate::util::extract_json_objects;

pub struct FunctionCallStrategy;

impl FunctionCallStrategy {
    fn call_from_function(function: &Value, id: Option<&str>, position: usize) -> Option<ToolCall> {
        let name = str_field(function, "name")?;
        let arguments = parse_arguments(function.get("arguments"))?;
        Some(ToolCall {
            id: call_id(id, position),
            name: name.to_string(),
            arguments,
        })
    }
}

impl ToolCallStrategy for FunctionCallStrategy {
    fn name(&self) -> &'static str {
        "function_call"
    }

    fn create_tool_prompt(&self, prompt: &str, tools: &[ToolDefinition]) -> String {
        format!(
            "{prompt}\n\nYou can call the following functions:\n\n{}\n\n\
             To call functions, reply with only a JSON object of the form:\n\
             {{\"tool_calls\": [{{\"id\": \"call_1\", \"type\": \"function\", \"function\": \
             {{\"name\": \"<function name>\", \"arguments\": \"<JSON-encoded arguments>\"}}}}]}}\n\
             If no function is needed, answer directly.",
            describe_tools(tools)
        )
    }

    fn has_tool_calls(&self, text: &str) -> bool {
        text.contains("\"tool_calls\"") || text.contains("\"function_call\"")
    }

    fn extract_tool_calls(&self, text: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();

        for object in extract_json_objects(text) {
            if let Some(entries) = object.get("tool_calls").and_then(|v| v.as_array()) {
                for entry in entries {
                    let Some(function) = entry.get("function") else {
                        tracing::debug!("Skipping tool call without function: {}", entry);
                        continue;
                    };
                    let id = str_field(entry, "id");
                    match Self::call_from_function(function, id, calls.len()) {
                        Some(call) => calls.push(call),
                        None => tracing::debug!("Skipping malformed tool call: {}", entry),
                    }
                }
            } else if let Some(function) = object.get("function_call") {
                match Self::call_from_function(function, None, calls.len()) {
                    Some(call) => calls.push(call),
                    None => tracing::debug!("Skipping malformed function_call: {}", function),
                }
            }
        }

        calls
    }

    fn format_tool_results(
        &self,
        results: &[ToolResult],
        original_prompt: &str,
        prior_response: &str,
    ) -> String {
        let rendered = results
            .iter()
            .map(|r| {
                json!({
                    "role": "tool",
                    "tool_call_id": r.call_id,
                    "name": r.tool_name,
                    "success": r.success,
                    "content": r.display_text(),
                })
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n");

        continuation_prompt(
            original_prompt,
            prior_response,
            &rendered,
            "Use these results to continue. Call more functions in the same JSON format if \
             needed; otherwise give your final answer.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_extracts_tool_calls_array() {
        let text = r#"{"content": null, "tool_calls": [
            {"id": "call_abc", "type": "function", "function": {"name": "search", "arguments": "{\"q\": \"rust\"}"}},
            {"type": "function", "function": {"name": "clock", "arguments": {}}}
        ]}"#;
        let calls = FunctionCallStrategy.extract_tool_calls(text);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["q"], "rust");
        assert_eq!(calls[1].id, "call_2");
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn test_extracts_legacy_function_call() {
        let text = r#"Calling now: {"function_call": {"name": "weather", "arguments": "{\"city\":\"Oslo\"}"}}"#;
        let calls = FunctionCallStrategy.extract_tool_calls(text);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "weather");
        assert_eq!(calls[0].arguments["city"], "Oslo");
        assert!(FunctionCallStrategy.has_tool_calls(text));
    }

    #[test]
    fn test_skips_malformed_calls() {
        let text = r#"{"tool_calls": [
            {"function": {"name": "", "arguments": "{}"}},
            {"function": {"name": "bad_args", "arguments": "not json"}},
            {"id": "x"},
            {"function": {"name": "good"}}
        ]}"#;
        let calls = FunctionCallStrategy.extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "good");
    }

    #[test]
    fn test_prompt_lists_tools() {
        let tools = vec![ToolDefinition {
            name: "search".to_string(),
            description: "Web search".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let prompt = FunctionCallStrategy.create_tool_prompt("Find news", &tools);
        assert!(prompt.starts_with("Find news"));
        assert!(prompt.contains("- search: Web search"));
        assert!(prompt.contains("tool_calls"));
    }

    #[test]
    fn test_format_results_carries_context() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: Default::default(),
        };
        let results = vec![ToolResult::succeeded(&call, "3 hits".to_string(), Duration::ZERO)];
        let prompt = FunctionCallStrategy.format_tool_results(&results, "Find news", "{calls}");

        assert!(prompt.starts_with("Find news"));
        assert!(prompt.contains("{calls}"));
        assert!(prompt.contains(r#""tool_call_id":"call_1""#));
        assert!(prompt.contains("3 hits"));
    }
}
