//! Memory update strategies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use super::MemoryArtifact;
use crate::llm::{ProviderAdapter, TokenUsage};

/// How a run's output is folded into memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    /// Ask the model to merge old memory and new content
    Extract,
    /// Keep everything and add a timestamped section
    #[default]
    Append,
    /// Overwrite the body with the new content
    Replace,
}

impl std::fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateStrategy::Extract => write!(f, "extract"),
            UpdateStrategy::Append => write!(f, "append"),
            UpdateStrategy::Replace => write!(f, "replace"),
        }
    }
}

/// Input for [`super::MemoryStore::update`].
pub struct UpdateRequest<'a> {
    pub strategy: UpdateStrategy,
    /// Output of the current run
    pub new_content: &'a str,
    /// Metadata merged key by key after the body update
    pub metadata_overrides: Option<Mapping>,
    /// Required by [`UpdateStrategy::Extract`]
    pub provider: Option<&'a ProviderAdapter>,
    pub timestamp: DateTime<Utc>,
}

impl<'a> UpdateRequest<'a> {
    pub fn new(strategy: UpdateStrategy, new_content: &'a str) -> Self {
        Self {
            strategy,
            new_content,
            metadata_overrides: None,
            provider: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_provider(mut self, provider: &'a ProviderAdapter) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_overrides(mut self, overrides: Mapping) -> Self {
        self.metadata_overrides = Some(overrides);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Result of an update; nothing is written until the caller saves.
#[derive(Debug, Clone)]
pub struct MemoryUpdate {
    pub artifact: MemoryArtifact,
    /// Body or metadata differs from the state before the update
    pub modified: bool,
    /// Secondary LLM usage (extract only)
    pub usage: Option<TokenUsage>,
    pub cost: Option<f64>,
}

impl MemoryUpdate {
    pub fn tokens_used(&self) -> Option<u64> {
        self.usage.as_ref().map(|u| u.total_tokens)
    }
}

/// Separator placed between the previous body and a new section.
pub(crate) const APPEND_SEPARATOR: &str = "\n\n---\n\n";

/// Existing body, a separator, then a timestamped section with the new content.
pub(crate) fn append_body(body: &str, content: &str, timestamp: DateTime<Utc>) -> String {
    let mut updated = String::with_capacity(body.len() + content.len() + 64);
    updated.push_str(body);
    if !body.is_empty() {
        updated.push_str(APPEND_SEPARATOR);
    }
    updated.push_str("### Update: ");
    updated.push_str(&timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
    updated.push_str("\n\n");
    updated.push_str(content.trim_end());
    updated.push('\n');
    updated
}

pub(crate) const EXTRACT_SYSTEM_PROMPT: &str = "You maintain the long-term memory document of a recurring automated task. \
Merge new information into the existing memory. Keep facts that will matter for future runs, \
drop duplicates and transient details, and reply with only the updated markdown document.";

pub(crate) fn extract_prompt(current_body: &str, new_content: &str) -> String {
    let current = if current_body.trim().is_empty() {
        "(empty)"
    } else {
        current_body.trim()
    };
    format!(
        "## Current memory\n\n{}\n\n## New information from the latest run\n\n{}\n\n\
         Return the complete updated memory document.",
        current,
        new_content.trim()
    )
}
