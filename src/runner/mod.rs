//! One execution cycle of a task.
//!
//! [`TaskRunner::run`] walks a fixed pipeline: load the task and its memory,
//! decide whether to run, render the prompt, call the provider (looping
//! through tool calls when tools are enabled), update memory, deliver the
//! result to every sink and record the execution. Each step returns a
//! `Result`; the first failure ends the run and is reported once.

mod prompt;
mod state;
mod types;

pub use prompt::{render_prompt, PromptContext};
pub use state::{RunState, RunTracker, StateError};
pub use types::{RunFailure, RunOutcome, RunReport, TaskRunnerError, UsageBreakdown};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::analytics::{ExecutionRecord, ExecutionRecorder};
use crate::config::{Config, TaskConfig};
use crate::dedup::{DedupContext, DeduplicationPolicy};
use crate::llm::{ProviderAdapter, ProviderFactory, ProviderResponse};
use crate::mcp::strategies::FINAL_ANSWER_INSTRUCTION;
use crate::mcp::{
    execute_with_timeout, select_strategy, McpClient, ToolCallStrategy, ToolDefinition,
    ToolExecutor, ToolResult,
};
use crate::memory::{topics_from_markdown, MemoryArtifact, MemoryStore, UpdateRequest};
use crate::output::{build_sinks, ResultMetadata, TaskResult};

/// Everything a run needs from the outside world.
#[derive(Clone)]
pub struct RunnerContext {
    pub config: Config,
    pub providers: Arc<dyn ProviderFactory>,
    pub recorder: Arc<dyn ExecutionRecorder>,
    /// Used for every task with tools enabled; otherwise an MCP client is
    /// built from the task's server list
    pub tools: Option<Arc<dyn ToolExecutor>>,
    /// Shared by webhook sinks
    pub http: reqwest::Client,
}

impl RunnerContext {
    pub fn new(
        config: Config,
        providers: Arc<dyn ProviderFactory>,
        recorder: Arc<dyn ExecutionRecorder>,
    ) -> Self {
        Self {
            config,
            providers,
            recorder,
            tools: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// A failed step: what was happening and why it failed.
struct StepError {
    message: String,
    source: RunFailure,
}

fn step<E: Into<RunFailure>>(message: &'static str) -> impl FnOnce(E) -> StepError {
    move |e| StepError {
        message: message.to_string(),
        source: e.into(),
    }
}

/// Book-keeping shared by the success and failure paths.
struct RunProgress {
    task_name: String,
    provider: String,
    run_id: Uuid,
    started: Instant,
    now: DateTime<Utc>,
    tracker: RunTracker,
    usage: UsageBreakdown,
    cost: f64,
}

impl RunProgress {
    fn new(task_dir: &Path) -> Self {
        let task_name = task_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| task_dir.display().to_string());
        Self {
            task_name,
            provider: String::new(),
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            now: Utc::now(),
            tracker: RunTracker::new(),
            usage: UsageBreakdown::default(),
            cost: 0.0,
        }
    }

    fn advance(&mut self, state: RunState) -> Result<(), StepError> {
        self.tracker
            .advance(state)
            .map_err(step("advancing the run state"))
    }

    fn add_primary(&mut self, response: &ProviderResponse) {
        self.usage.primary.accumulate(&response.usage);
        self.cost += response.cost;
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn record(&self, success: bool, error: Option<String>) -> ExecutionRecord {
        let tokens = self.usage.total().total_tokens;
        ExecutionRecord {
            timestamp: self.now,
            run_id: self.run_id,
            task_name: self.task_name.clone(),
            success,
            tokens_used: (success || tokens > 0).then_some(tokens),
            cost: (success || self.cost > 0.0).then_some(self.cost),
            provider: self.provider.clone(),
            execution_time_ms: self.elapsed_ms(),
            error,
        }
    }
}

/// The tools offered to the model during a run.
struct Tooling {
    executor: Arc<dyn ToolExecutor>,
    strategy: Box<dyn ToolCallStrategy>,
    definitions: Vec<ToolDefinition>,
    timeout: Duration,
    max_calls: usize,
}

/// Executes tasks against a [`RunnerContext`].
#[derive(Clone)]
pub struct TaskRunner {
    context: RunnerContext,
}

impl TaskRunner {
    pub fn new(context: RunnerContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &RunnerContext {
        &self.context
    }

    /// Run the task in `task_dir` once.
    ///
    /// A failed run is recorded before the error is returned; a skipped run
    /// is not recorded.
    pub async fn run(&self, task_dir: &Path) -> Result<RunOutcome, TaskRunnerError> {
        let mut progress = RunProgress::new(task_dir);

        match self.execute(task_dir, &mut progress).await {
            Ok(outcome) => Ok(outcome),
            Err(StepError { message, source }) => {
                tracing::error!("Task {} failed while {}: {}", progress.task_name, message, source);
                let record = progress.record(false, Some(format!("{}: {}", message, source)));
                if let Err(e) = self.context.recorder.record(&record).await {
                    tracing::warn!(
                        "Could not record failed run of {}: {}",
                        progress.task_name,
                        e
                    );
                }
                Err(TaskRunnerError {
                    task: progress.task_name,
                    message,
                    source,
                })
            }
        }
    }

    async fn execute(
        &self,
        task_dir: &Path,
        progress: &mut RunProgress,
    ) -> Result<RunOutcome, StepError> {
        let config = &self.context.config;

        let task = TaskConfig::load(task_dir).map_err(step("loading the task config"))?;
        progress.task_name = task.name.clone();
        progress.provider = task.provider.clone();
        let template = task
            .prompt_template()
            .map_err(step("reading the prompt template"))?;
        let provider = self
            .context
            .providers
            .create(&task)
            .map_err(step("creating the provider"))?;
        progress.advance(RunState::ConfigLoaded)?;
        tracing::info!(
            "Running task {} with {} (schedule: {})",
            task.name,
            provider.id(),
            task.schedule.as_deref().unwrap_or("manual")
        );

        let store = MemoryStore::new(task.memory_path());
        let memory = if task.memory.enabled {
            store.load().await.map_err(step("loading memory"))?
        } else {
            MemoryArtifact::default()
        };
        progress.advance(RunState::MemoryLoaded)?;

        // Content checks judge the prompt as it will be sent
        let mut prompt = render_prompt(
            &template,
            &PromptContext {
                task_name: &task.name,
                now: progress.now,
                memory: &memory,
            },
        );
        let dedup = DeduplicationPolicy::for_task(&task)
            .decide(
                &memory,
                &DedupContext {
                    task_name: &task.name,
                    prompt: &prompt,
                    now: progress.now,
                    provider: Some(&provider),
                },
            )
            .await;
        progress.usage.dedup = dedup.usage.clone();
        progress.cost += dedup.cost;
        progress.advance(RunState::Deduplicated)?;

        if !dedup.decision.should_run {
            tracing::info!("Skipping {}: {}", task.name, dedup.decision.reason);
            progress.advance(RunState::Done)?;
            return Ok(RunOutcome::Skipped {
                task_name: task.name,
                reason: dedup.decision.reason,
            });
        }

        let tooling = self.prepare_tools(&task, &provider).await;
        if let Some(tooling) = &tooling {
            prompt = tooling
                .strategy
                .create_tool_prompt(&prompt, &tooling.definitions);
        }
        progress.advance(RunState::PromptRendered)?;

        let call_started = Instant::now();
        let response = provider
            .call(&prompt)
            .await
            .map_err(step("calling the provider"))?;
        progress.add_primary(&response);
        progress.advance(RunState::ProviderInvoked)?;

        let mut content = response.content.clone();
        let mut model = response.model.clone();
        let mut tool_calls = Vec::new();
        if let Some(tooling) = &tooling {
            let last = self
                .tool_loop(tooling, &provider, &prompt, content, &mut tool_calls, progress)
                .await?;
            content = last.content;
            model = last.model;
        }
        let response_time_ms = call_started.elapsed().as_millis() as u64;

        let mut memory_updated = false;
        if task.memory.enabled {
            let update = store
                .update(
                    &memory,
                    UpdateRequest::new(task.memory.strategy, &content)
                        .with_provider(&provider)
                        .at(progress.now),
                )
                .await
                .map_err(step("updating memory"))?;
            if let Some(cost) = update.cost {
                progress.cost += cost;
            }
            progress.usage.memory = update.usage.clone();

            let mut artifact = update.artifact;
            artifact.record_run(
                progress.now,
                progress.usage.total().total_tokens,
                progress.cost,
                topics_from_markdown(&content),
            );
            store
                .save(&artifact)
                .await
                .map_err(step("saving memory"))?;
            memory_updated = true;
        }
        progress.advance(RunState::MemoryUpdated)?;

        let tokens_used = progress.usage.total().total_tokens;
        let result = TaskResult {
            task_name: task.name.clone(),
            timestamp: progress.now,
            success: true,
            response: content.clone(),
            metadata: ResultMetadata {
                provider: provider.id().backend.to_string(),
                model: model.clone(),
                tokens: tokens_used,
                cost: progress.cost,
                response_time_ms,
            },
            error: None,
        };

        let mut outputs_created = Vec::new();
        if config.dry_run {
            tracing::info!(
                "Dry run: skipping {} output(s) for {}",
                task.outputs.len(),
                task.name
            );
        } else {
            for sink in build_sinks(&task, &self.context.http) {
                tracing::debug!("Delivering {} to {}", task.name, sink.describe());
                if let Some(location) = sink
                    .execute(&result)
                    .await
                    .map_err(step("writing outputs"))?
                {
                    outputs_created.push(location);
                }
            }
        }
        progress.advance(RunState::OutputsPersisted)?;

        self.context
            .recorder
            .record(&progress.record(true, None))
            .await
            .map_err(step("recording analytics"))?;
        progress.advance(RunState::AnalyticsRecorded)?;
        progress.advance(RunState::Done)?;

        let report = RunReport {
            task_name: task.name,
            run_id: progress.run_id,
            provider: provider.id().to_string(),
            model,
            response: content,
            tokens_used,
            cost: progress.cost,
            execution_time_ms: progress.elapsed_ms(),
            outputs_created,
            memory_updated,
            tool_calls,
            usage: progress.usage.clone(),
        };
        tracing::info!(
            "Task {} completed: {} tokens, ${:.6}, {} tool call(s), {} output(s)",
            report.task_name,
            report.tokens_used,
            report.cost,
            report.tool_calls.len(),
            report.outputs_created.len()
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Resolve the executor and strategy, or `None` to run without tools.
    async fn prepare_tools(&self, task: &TaskConfig, provider: &ProviderAdapter) -> Option<Tooling> {
        if !task.tools.enabled {
            return None;
        }
        let executor = match &self.context.tools {
            Some(executor) => executor.clone(),
            None if !task.tools.servers.is_empty() => {
                Arc::new(McpClient::new(task.tools.servers.clone())) as Arc<dyn ToolExecutor>
            }
            None => {
                tracing::warn!("Tools enabled for {} but no tool source configured", task.name);
                return None;
            }
        };

        let definitions = match executor.list_tools().await {
            Ok(definitions) if !definitions.is_empty() => definitions,
            Ok(_) => {
                tracing::warn!("No tools available for {}; running without tools", task.name);
                return None;
            }
            Err(e) => {
                tracing::warn!("Listing tools for {} failed: {}; running without tools", task.name, e);
                return None;
            }
        };

        let strategy = select_strategy(provider.id().backend.as_str(), task.tools.strategy.as_deref());
        tracing::info!(
            "Offering {} tool(s) to {} using the {} strategy",
            definitions.len(),
            task.name,
            strategy.name()
        );
        Some(Tooling {
            executor,
            strategy,
            definitions,
            timeout: Duration::from_secs(task.tools.timeout_secs),
            max_calls: task.effective_max_tool_calls(self.context.config.max_tool_calls) as usize,
        })
    }

    /// Execute requested tools and re-prompt until the model stops asking or
    /// the cap is reached. Returns the last provider response.
    async fn tool_loop(
        &self,
        tooling: &Tooling,
        provider: &ProviderAdapter,
        prompt: &str,
        first_content: String,
        tool_calls: &mut Vec<ToolResult>,
        progress: &mut RunProgress,
    ) -> Result<LastResponse, StepError> {
        let mut last = LastResponse {
            content: first_content,
            model: provider.id().model.clone(),
        };

        loop {
            if !tooling.strategy.has_tool_calls(&last.content) {
                break;
            }
            let calls = tooling.strategy.extract_tool_calls(&last.content);
            let remaining = tooling.max_calls.saturating_sub(tool_calls.len());
            if calls.is_empty() || remaining == 0 {
                if !calls.is_empty() {
                    tracing::warn!(
                        "Tool call cap of {} reached; ignoring {} further call(s)",
                        tooling.max_calls,
                        calls.len()
                    );
                }
                break;
            }
            if calls.len() > remaining {
                tracing::warn!(
                    "Model requested {} tool call(s), only {} left under the cap",
                    calls.len(),
                    remaining
                );
            }

            let mut results = Vec::new();
            for call in calls.iter().take(remaining) {
                tracing::info!("Calling tool {} ({})", call.name, call.id);
                results.push(
                    execute_with_timeout(tooling.executor.as_ref(), call, tooling.timeout).await,
                );
            }
            tool_calls.extend(results.iter().cloned());

            let capped = tool_calls.len() >= tooling.max_calls;
            let mut next_prompt = tooling
                .strategy
                .format_tool_results(&results, prompt, &last.content);
            if capped {
                next_prompt.push_str("\n\n");
                next_prompt.push_str(FINAL_ANSWER_INSTRUCTION);
            }

            progress.advance(RunState::ToolLoop)?;
            let response = provider
                .call(&next_prompt)
                .await
                .map_err(step("calling the provider with tool results"))?;
            progress.add_primary(&response);
            last = LastResponse {
                content: response.content,
                model: response.model,
            };

            if capped {
                break;
            }
        }

        Ok(last)
    }
}

struct LastResponse {
    content: String,
    model: String,
}
