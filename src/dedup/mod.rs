//! Run deduplication.
//!
//! Decides, before the primary provider call, whether a run would repeat
//! recent work. Time-based checks look at `lastRun`; content-based checks ask
//! the model to compare the upcoming task with what memory already holds.
//! Any doubt resolves to running the task.

mod content;

pub use content::{parse_verdict, Verdict};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;
use crate::llm::{ProviderAdapter, TokenUsage};
use crate::memory::MemoryArtifact;

/// Which checks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    #[default]
    Time,
    Content,
    /// Time first, content only when time does not skip
    Hybrid,
}

impl std::fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupStrategy::Time => write!(f, "time"),
            DedupStrategy::Content => write!(f, "content"),
            DedupStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub enabled: bool,
    pub strategy: DedupStrategy,
    pub window_minutes: u64,
    /// Content duplicates are skipped only above this confidence
    pub confidence_threshold: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: DedupStrategy::Time,
            window_minutes: 60,
            confidence_threshold: 0.7,
        }
    }
}

/// Whether to run, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupDecision {
    pub should_run: bool,
    pub reason: String,
}

impl DedupDecision {
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            should_run: true,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_run: false,
            reason: reason.into(),
        }
    }
}

/// What the policy knows about the upcoming run.
pub struct DedupContext<'a> {
    pub task_name: &'a str,
    /// The rendered prompt about to be sent
    pub prompt: &'a str,
    pub now: DateTime<Utc>,
    /// Used by content-based checks
    pub provider: Option<&'a ProviderAdapter>,
}

/// A decision plus the cost of reaching it.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub decision: DedupDecision,
    pub usage: Option<TokenUsage>,
    pub cost: f64,
}

impl From<DedupDecision> for DedupOutcome {
    fn from(decision: DedupDecision) -> Self {
        Self {
            decision,
            usage: None,
            cost: 0.0,
        }
    }
}

/// Per-task deduplication policy.
#[derive(Debug, Clone)]
pub struct DeduplicationPolicy {
    settings: DedupSettings,
    memory_enabled: bool,
}

impl DeduplicationPolicy {
    pub fn new(settings: DedupSettings, memory_enabled: bool) -> Self {
        Self {
            settings,
            memory_enabled,
        }
    }

    pub fn for_task(task: &TaskConfig) -> Self {
        Self::new(task.memory.dedup.clone(), task.memory.enabled)
    }

    /// Decide whether the run should happen.
    pub async fn decide(&self, memory: &MemoryArtifact, context: &DedupContext<'_>) -> DedupOutcome {
        if !self.settings.enabled {
            return DedupDecision::proceed("deduplication disabled").into();
        }
        if !self.memory_enabled {
            return DedupDecision::proceed("memory disabled; no run history to compare").into();
        }

        let window = self.settings.window_minutes;
        let outcome = match self.settings.strategy {
            DedupStrategy::Time => time_based(memory.last_run(), context.now, window).into(),
            DedupStrategy::Content => {
                content::content_based(memory, context, self.settings.confidence_threshold).await
            }
            DedupStrategy::Hybrid => {
                let by_time = time_based(memory.last_run(), context.now, window);
                if by_time.should_run {
                    content::content_based(memory, context, self.settings.confidence_threshold)
                        .await
                } else {
                    by_time.into()
                }
            }
        };

        tracing::info!(
            "Dedup ({}) for {}: {} ({})",
            self.settings.strategy,
            context.task_name,
            if outcome.decision.should_run { "run" } else { "skip" },
            outcome.decision.reason
        );
        outcome
    }
}

/// Skip iff the previous run started less than `window_minutes` ago.
pub fn time_based(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window_minutes: u64,
) -> DedupDecision {
    let Some(last_run) = last_run else {
        return DedupDecision::proceed("first run (no previous run recorded)");
    };

    let elapsed = now.signed_duration_since(last_run);
    if elapsed < chrono::Duration::zero() {
        return DedupDecision::skip(format!(
            "last run timestamp {} is in the future",
            last_run.to_rfc3339()
        ));
    }

    let minutes = elapsed.num_minutes();
    // Windows too large for a duration never expire
    let within_window = i64::try_from(window_minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .map_or(true, |window| elapsed < window);
    if within_window {
        DedupDecision::skip(format!(
            "last run was {} minutes ago (window: {} minutes)",
            minutes, window_minutes
        ))
    } else {
        DedupDecision::proceed(format!(
            "last run was {} minutes ago, outside the {} minute window",
            minutes, window_minutes
        ))
    }
}
