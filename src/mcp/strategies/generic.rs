//! Tag-based calling for models without native tool support.
//!
//! Calls look like `<tool_call>{"name": "...", "arguments": {...}}</tool_call>`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::{
    call_id, continuation_prompt, describe_tools, parse_arguments, str_field, ToolCallStrategy,
};
use crate::mcp::{ToolCall, ToolDefinition, ToolResult};

pub struct GenericStrategy;

fn tool_call_tag() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("tool_call pattern is valid")
    })
}

impl ToolCallStrategy for GenericStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn create_tool_prompt(&self, prompt: &str, tools: &[ToolDefinition]) -> String {
        format!(
            "{prompt}\n\nYou can use the following tools:\n\n{}\n\n\
             To use a tool, write exactly:\n\
             <tool_call>{{\"name\": \"<tool name>\", \"arguments\": {{...}}}}</tool_call>\n\
             You may include several <tool_call> blocks. If no tool is needed, answer directly.",
            describe_tools(tools)
        )
    }

    fn has_tool_calls(&self, text: &str) -> bool {
        text.contains("<tool_call>")
    }

    fn extract_tool_calls(&self, text: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();

        for captures in tool_call_tag().captures_iter(text) {
            let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let Ok(value) = serde_json::from_str::<Value>(inner) else {
                tracing::debug!("Skipping unparseable <tool_call>: {}", inner);
                continue;
            };
            let Some(name) = str_field(&value, "name") else {
                tracing::debug!("Skipping <tool_call> without name");
                continue;
            };
            let raw_args = value.get("arguments").or_else(|| value.get("parameters"));
            let Some(arguments) = parse_arguments(raw_args) else {
                tracing::debug!("Skipping <tool_call> {} with malformed arguments", name);
                continue;
            };
            calls.push(ToolCall {
                id: call_id(str_field(&value, "id"), calls.len()),
                name: name.to_string(),
                arguments,
            });
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
                let status = if r.success { "success" } else { "error" };
                format!(
                    "<tool_result name=\"{}\" id=\"{}\" status=\"{}\">\n{}\n</tool_result>",
                    r.tool_name,
                    r.call_id,
                    status,
                    r.display_text()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        continuation_prompt(
            original_prompt,
            prior_response,
            &rendered,
            "Continue using these results. Emit more <tool_call> blocks if needed; otherwise give \
             your final answer.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_extracts_multiple_tagged_calls() {
        let text = r#"Sure.
<tool_call>{"name": "search", "arguments": {"q": "rust"}}</tool_call>
then
<tool_call>
  {"name": "fetch", "parameters": "{\"url\": \"https://example.com\"}"}
</tool_call>"#;
        let calls = GenericStrategy.extract_tool_calls(text);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments["q"], "rust");
        assert_eq!(calls[1].name, "fetch");
        assert_eq!(calls[1].arguments["url"], "https://example.com");
    }

    #[test]
    fn test_skips_malformed_tags() {
        let text = "<tool_call>{oops}</tool_call><tool_call>{\"arguments\": {}}</tool_call>\
                    <tool_call>{\"name\": \"ok\"}</tool_call>";
        let calls = GenericStrategy.extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
        // Position counts only accepted calls
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn test_unclosed_tag_is_not_a_call() {
        assert!(!GenericStrategy.has_tool_calls(r#"<tool_call>{"name": "x"}"#));
    }

    #[test]
    fn test_format_results() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: Default::default(),
        };
        let results = vec![ToolResult::succeeded(&call, "hits".to_string(), Duration::ZERO)];
        let prompt = GenericStrategy.format_tool_results(&results, "Q", "A");
        assert!(prompt.contains("<tool_result name=\"search\" id=\"call_1\" status=\"success\">"));
        assert!(prompt.starts_with("Q"));
    }
}
