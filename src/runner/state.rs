//! Run state machine.

use serde::Serialize;
use thiserror::Error;

/// Stages of one run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    ConfigLoaded,
    MemoryLoaded,
    Deduplicated,
    PromptRendered,
    ProviderInvoked,
    ToolLoop,
    MemoryUpdated,
    OutputsPersisted,
    AnalyticsRecorded,
    Done,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid run transition {current:?} -> {requested:?}")]
pub struct StateError {
    pub current: Option<RunState>,
    pub requested: RunState,
}

/// Tracks progress and refuses backward moves.
///
/// Stages may be skipped; only `ToolLoop` may repeat.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    current: Option<RunState>,
    history: Vec<RunState>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<RunState> {
        self.current
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), StateError> {
        let allowed = match self.current {
            None => true,
            Some(RunState::ToolLoop) if next == RunState::ToolLoop => true,
            Some(current) => next > current,
        };
        if !allowed {
            return Err(StateError {
                current: self.current,
                requested: next,
            });
        }

        tracing::debug!("Run state {:?} -> {:?}", self.current, next);
        self.current = Some(next);
        self.history.push(next);
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.current == Some(RunState::Done)
    }
}
