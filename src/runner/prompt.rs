//! Prompt template rendering.

use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};

use crate::memory::MemoryArtifact;

/// Values available to `{{placeholder}}` substitution.
pub struct PromptContext<'a> {
    pub task_name: &'a str,
    pub now: DateTime<Utc>,
    pub memory: &'a MemoryArtifact,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("placeholder regex is valid"))
}

/// Substitute known placeholders; unknown ones are left as written.
pub fn render_prompt(template: &str, context: &PromptContext<'_>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            lookup(&caps[1], context).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn lookup(name: &str, context: &PromptContext<'_>) -> Option<String> {
    let memory = context.memory;
    let value = match name {
        "task_name" => context.task_name.to_string(),
        "date" => context.now.format("%Y-%m-%d").to_string(),
        "datetime" => context.now.to_rfc3339_opts(SecondsFormat::Secs, true),
        "memory" => memory.body.trim().to_string(),
        "last_run" => memory
            .last_run()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "never".to_string()),
        "total_runs" => memory.total_runs().to_string(),
        "last_topics" => {
            let topics = memory.last_topics();
            if topics.is_empty() {
                "none".to_string()
            } else {
                topics.join(", ")
            }
        }
        _ => return None,
    };
    Some(value)
}
