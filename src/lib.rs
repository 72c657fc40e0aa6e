//! # cronagent
//!
//! Execution engine for periodically scheduled LLM tasks.
//!
//! A task is a directory holding `task.yaml`, an optional prompt file and a
//! memory file that persists across runs. Something external (cron, a CI
//! schedule) triggers a run; this crate does the rest:
//!
//! ```text
//!  task.yaml ──► TaskRunner ──► DeduplicationPolicy ──► skip?
//!                    │
//!                    ▼
//!             ProviderAdapter ◄──► ToolCallStrategy ◄──► ToolExecutor (MCP)
//!                    │
//!                    ▼
//!   MemoryStore ◄────┼────► OutputSink (file, webhook)
//!                    ▼
//!            ExecutionRecorder
//! ```
//!
//! ## Modules
//! - `runner`: the per-run state machine
//! - `llm`: provider backends, retry and the error taxonomy
//! - `cost`: model pricing
//! - `memory`: frontmatter + markdown memory with update strategies
//! - `dedup`: time and content based run deduplication
//! - `mcp`: tool executors and tool-call wire formats
//! - `output`: result sinks
//! - `analytics`: per-run execution records

pub mod analytics;
pub mod config;
pub mod cost;
pub mod dedup;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod output;
pub mod runner;
pub mod util;

pub use config::{Config, TaskConfig};
pub use runner::{RunOutcome, RunnerContext, TaskRunner, TaskRunnerError};
