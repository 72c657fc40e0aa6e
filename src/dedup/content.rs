//! Model-judged content duplication.

use serde::Deserialize;

use super::{DedupContext, DedupDecision, DedupOutcome};
use crate::memory::MemoryArtifact;
use crate::util::{extract_json_objects, truncate_chars};

const SYSTEM_PROMPT: &str = "You decide whether a scheduled task would repeat work it has already done. \
Reply with only a JSON object: {\"duplicate\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"...\"}.";

/// Memory is truncated to keep the check cheap.
const MAX_MEMORY_CHARS: usize = 8000;

/// The model's judgement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    pub duplicate: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// First JSON object in `text` that looks like a verdict.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    extract_json_objects(text)
        .into_iter()
        .filter(|v| v.get("duplicate").is_some_and(|d| d.is_boolean()))
        .find_map(|v| serde_json::from_value::<Verdict>(v).ok())
        .map(|mut verdict| {
            verdict.confidence = if verdict.confidence.is_finite() {
                verdict.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            verdict
        })
}

fn check_prompt(memory: &MemoryArtifact, context: &DedupContext<'_>) -> String {
    let topics = memory.last_topics();
    let topics = if topics.is_empty() {
        "(none recorded)".to_string()
    } else {
        topics.join(", ")
    };
    let last_run = memory
        .last_run()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "Task: {}\nLast run: {}\nRecent topics: {}\n\n## Memory from previous runs\n\n{}\n\n\
         ## Upcoming task prompt\n\n{}\n\n\
         Would running this task now mostly repeat content already covered in memory?",
        context.task_name,
        last_run,
        topics,
        truncate_chars(memory.body.trim(), MAX_MEMORY_CHARS),
        context.prompt.trim()
    )
}

/// Ask the model; skip only on a confident duplicate verdict.
pub(super) async fn content_based(
    memory: &MemoryArtifact,
    context: &DedupContext<'_>,
    threshold: f64,
) -> DedupOutcome {
    if memory.body.trim().is_empty() && memory.last_topics().is_empty() {
        return DedupDecision::proceed("no previous content to compare against").into();
    }
    let Some(provider) = context.provider else {
        tracing::warn!("Content dedup for {} has no provider; running", context.task_name);
        return DedupDecision::proceed("content check unavailable (no provider)").into();
    };

    let response = match provider
        .call_with_system(&check_prompt(memory, context), SYSTEM_PROMPT)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Content dedup check for {} failed: {}", context.task_name, e);
            return DedupDecision::proceed(format!("content check failed ({}); running anyway", e.kind))
                .into();
        }
    };

    let decision = match parse_verdict(&response.content) {
        Some(verdict) if verdict.duplicate && verdict.confidence > threshold => {
            let reason = if verdict.reason.trim().is_empty() {
                "content duplicates a previous run".to_string()
            } else {
                verdict.reason.trim().to_string()
            };
            DedupDecision::skip(format!(
                "duplicate content (confidence {:.2}): {}",
                verdict.confidence, reason
            ))
        }
        Some(verdict) => DedupDecision::proceed(format!(
            "not a confident duplicate (duplicate: {}, confidence {:.2})",
            verdict.duplicate, verdict.confidence
        )),
        None => {
            tracing::warn!(
                "Unparseable dedup verdict for {}: {}",
                context.task_name,
                truncate_chars(&response.content, 200)
            );
            DedupDecision::proceed("content check returned an unreadable verdict; running anyway")
        }
    };

    DedupOutcome {
        decision,
        usage: Some(response.usage),
        cost: response.cost,
    }
}
