//! Anthropic-style content blocks.
//!
//! Recognises a `content` array of `{"type": "tool_use", "id", "name", "input"}`
//! blocks, a bare `tool_use` block, a top-level `{"tool_use": {...}}` wrapper,
//! and `<tool_use>{...}</tool_use>` tags in free text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use super::{
    call_id, continuation_prompt, describe_tools, parse_arguments, str_field, ToolCallStrategy,
};
use crate::mcp::{ToolCall, ToolDefinition, ToolResult};
use crate::util::extract_json_objects;

pub struct ContentBlockStrategy;

fn tool_use_tag() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<tool_use>\s*(.*?)\s*</tool_use>").expect("tool_use pattern is valid")
    })
}

impl ContentBlockStrategy {
    fn is_tool_use(block: &Value) -> bool {
        block.get("type").and_then(|t| t.as_str()) == Some("tool_use")
    }

    fn call_from_block(block: &Value, position: usize) -> Option<ToolCall> {
        let name = str_field(block, "name")?;
        let input = block.get("input").or_else(|| block.get("arguments"));
        let arguments = parse_arguments(input)?;
        Some(ToolCall {
            id: call_id(str_field(block, "id"), position),
            name: name.to_string(),
            arguments,
        })
    }

    fn push_block(calls: &mut Vec<ToolCall>, block: &Value) {
        match Self::call_from_block(block, calls.len()) {
            Some(call) => calls.push(call),
            None => tracing::debug!("Skipping malformed tool_use block: {}", block),
        }
    }
}

impl ToolCallStrategy for ContentBlockStrategy {
    fn name(&self) -> &'static str {
        "content_block"
    }

    fn create_tool_prompt(&self, prompt: &str, tools: &[ToolDefinition]) -> String {
        format!(
            "{prompt}\n\nYou have access to these tools:\n\n{}\n\n\
             To use a tool, include a block like:\n\
             <tool_use>{{\"id\": \"toolu_1\", \"name\": \"<tool name>\", \"input\": {{...}}}}</tool_use>\n\
             You may use several tools at once. If no tool is needed, answer directly.",
            describe_tools(tools)
        )
    }

    fn has_tool_calls(&self, text: &str) -> bool {
        text.contains("tool_use")
    }

    fn extract_tool_calls(&self, text: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();

        for captures in tool_use_tag().captures_iter(text) {
            let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            match serde_json::from_str::<Value>(inner) {
                Ok(block) => Self::push_block(&mut calls, &block),
                Err(e) => tracing::debug!("Skipping unparseable <tool_use> tag: {}", e),
            }
        }

        // Tag bodies are already handled; scan the rest for JSON blocks
        let remainder = tool_use_tag().replace_all(text, "");
        for object in extract_json_objects(&remainder) {
            if let Some(blocks) = object.get("content").and_then(|c| c.as_array()) {
                for block in blocks.iter().filter(|b| Self::is_tool_use(b)) {
                    Self::push_block(&mut calls, block);
                }
            } else if let Some(block) = object.get("tool_use").filter(|b| b.is_object()) {
                Self::push_block(&mut calls, block);
            } else if Self::is_tool_use(&object) {
                Self::push_block(&mut calls, &object);
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
        let blocks: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": r.call_id,
                    "content": r.display_text(),
                    "is_error": !r.success,
                })
            })
            .collect();
        let rendered = serde_json::to_string_pretty(&blocks).unwrap_or_default();

        continuation_prompt(
            original_prompt,
            prior_response,
            &rendered,
            "Continue the task using these tool results. Use more tools with <tool_use> blocks \
             if needed; otherwise give your final answer.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_extracts_content_array_blocks() {
        let text = r#"{"content": [
            {"type": "text", "text": "Let me check"},
            {"type": "tool_use", "id": "toolu_01", "name": "weather", "input": {"city": "Oslo"}}
        ]}"#;
        let calls = ContentBlockStrategy.extract_tool_calls(text);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_01");
        assert_eq!(calls[0].name, "weather");
        assert_eq!(calls[0].arguments["city"], "Oslo");
    }

    #[test]
    fn test_extracts_top_level_tool_use() {
        let text = r#"{"tool_use": {"name": "clock", "input": {}}}"#;
        let calls = ContentBlockStrategy.extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn test_extracts_tagged_blocks_once() {
        let text = r#"Checking two things.
<tool_use>{"type": "tool_use", "id": "a", "name": "search", "input": {"q": "rust"}}</tool_use>
<tool_use>
{"name": "clock", "input": {}}
</tool_use>
<tool_use>{broken</tool_use>"#;
        let calls = ContentBlockStrategy.extract_tool_calls(text);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[1].name, "clock");
        assert_eq!(calls[1].id, "call_2");
    }

    #[test]
    fn test_ignores_text_only_content() {
        let text = r#"{"content": [{"type": "text", "text": "Just an answer"}]}"#;
        assert!(!ContentBlockStrategy.has_tool_calls(text));
    }

    #[test]
    fn test_format_results_marks_errors() {
        let call = ToolCall {
            id: "toolu_01".to_string(),
            name: "weather".to_string(),
            arguments: Default::default(),
        };
        let results = vec![ToolResult::failed(&call, "offline".to_string(), Duration::ZERO)];
        let prompt = ContentBlockStrategy.format_tool_results(&results, "Weather?", "...");

        assert!(prompt.contains(r#""tool_use_id": "toolu_01""#));
        assert!(prompt.contains(r#""is_error": true"#));
        assert!(prompt.contains("offline"));
    }
}
