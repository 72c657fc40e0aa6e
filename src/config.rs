//! Configuration management for cronagent.
//!
//! Process-level configuration is read from environment variables:
//! - `CRONAGENT_TASKS_DIR` - Optional. Directory holding one sub-directory per task. Defaults to `./tasks`.
//! - `CRONAGENT_ANALYTICS_FILE` - Optional. JSON lines file for execution records. Defaults to `<tasks_dir>/.analytics/executions.jsonl`.
//! - `CRONAGENT_MAX_TOOL_CALLS` - Optional. Global cap on tool calls per run, overriding task settings.
//! - `CRONAGENT_DRY_RUN` - Optional. When true, outputs are rendered but no sink is written.
//!
//! Each task is described by `<task_dir>/task.yaml` (or `task.yml`), loaded
//! into a [`TaskConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::{CostError, ModelPricing};
use crate::dedup::{DedupSettings, DedupStrategy};
use crate::llm::{ProviderId, RetryPolicy};
use crate::mcp::strategies::strategy_by_name;
use crate::memory::UpdateStrategy;
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Task config not found in {0}")]
    TaskNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse task config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid provider identifier '{0}' (expected backend:model)")]
    InvalidProvider(String),

    #[error("Unknown provider backend '{0}'")]
    UnknownBackend(String),

    #[error(transparent)]
    Pricing(#[from] CostError),
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing task directories
    pub tasks_dir: PathBuf,

    /// Where execution records are appended
    pub analytics_file: PathBuf,

    /// Global tool-call cap, applied on top of each task's own limit
    pub max_tool_calls: Option<u32>,

    /// Skip every output sink
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        let tasks_dir = PathBuf::from("./tasks");
        Self {
            analytics_file: default_analytics_file(&tasks_dir),
            tasks_dir,
            max_tool_calls: None,
            dry_run: false,
        }
    }
}

fn default_analytics_file(tasks_dir: &Path) -> PathBuf {
    tasks_dir.join(".analytics").join("executions.jsonl")
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `CRONAGENT_MAX_TOOL_CALLS` is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let tasks_dir = std::env::var("CRONAGENT_TASKS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./tasks"));

        let analytics_file = std::env::var("CRONAGENT_ANALYTICS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_analytics_file(&tasks_dir));

        let max_tool_calls = match std::env::var("CRONAGENT_MAX_TOOL_CALLS") {
            Ok(value) => Some(value.trim().parse().map_err(|e| {
                ConfigError::InvalidValue("CRONAGENT_MAX_TOOL_CALLS".to_string(), format!("{}", e))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            tasks_dir,
            analytics_file,
            max_tool_calls,
            dry_run: env_var_bool("CRONAGENT_DRY_RUN", false),
        })
    }

    /// Resolve a task reference: an existing directory path, or a name under `tasks_dir`.
    pub fn resolve_task_dir(&self, task: &str) -> PathBuf {
        let as_path = PathBuf::from(task);
        if as_path.is_dir() {
            as_path
        } else {
            self.tasks_dir.join(task)
        }
    }
}

/// One scheduled task, as described by `task.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    /// `backend:model`, e.g. `openai:gpt-4o-mini`
    pub provider: String,

    /// Inline prompt template
    #[serde(default)]
    pub prompt: Option<String>,

    /// Prompt template file, relative to the task directory
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    /// Cron expression; informational, the trigger is external
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub options: TaskOptions,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-task pricing override ($ per 1K tokens)
    #[serde(default)]
    pub pricing: Option<ModelPricing>,

    /// Directory the config was loaded from
    #[serde(skip)]
    pub task_dir: PathBuf,
}

/// Memory persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub enabled: bool,
    pub strategy: UpdateStrategy,
    /// Memory artifact path, relative to the task directory
    pub file: PathBuf,
    pub dedup: DedupSettings,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: UpdateStrategy::default(),
            file: PathBuf::from("memory.md"),
            dedup: DedupSettings::default(),
        }
    }
}

/// Output file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

/// Where the finished result goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputDescriptor {
    File {
        path: String,
        #[serde(default)]
        format: OutputFormat,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// An MCP server reachable over HTTP JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerSettings {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Tool-calling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub enabled: bool,
    pub max_tool_calls: u32,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Strategy override (`function_call`, `content_block`, `generic`)
    pub strategy: Option<String>,
    pub servers: Vec<McpServerSettings>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tool_calls: 5,
            timeout_secs: 30,
            strategy: None,
            servers: Vec::new(),
        }
    }
}

/// Completion options applied to every provider call of the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub system_prompt: Option<String>,
    /// Per-attempt provider timeout
    pub timeout_secs: u64,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            timeout_secs: 120,
        }
    }
}

const TASK_FILES: [&str; 2] = ["task.yaml", "task.yml"];

impl TaskConfig {
    /// Load and validate `task.yaml` (or `task.yml`) from a task directory.
    pub fn load(task_dir: &Path) -> Result<Self, ConfigError> {
        let path = TASK_FILES
            .iter()
            .map(|f| task_dir.join(f))
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::TaskNotFound(task_dir.to_path_buf()))?;

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let mut config = Self::from_yaml_str(&contents)?;
        config.task_dir = task_dir.to_path_buf();
        tracing::debug!("Loaded task '{}' from {}", config.name, path.display());
        Ok(config)
    }

    /// Parse and validate a task definition.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TaskConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, msg: &str| {
            Err(ConfigError::InvalidValue(field.to_string(), msg.to_string()))
        };

        if self.name.trim().is_empty() {
            return invalid("name", "must not be empty");
        }
        ProviderId::parse(&self.provider)?;

        let has_prompt = self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        if !has_prompt && self.prompt_file.is_none() {
            return invalid("prompt", "either prompt or prompt_file is required");
        }

        let dedup = &self.memory.dedup;
        if !(0.0..=1.0).contains(&dedup.confidence_threshold) {
            return invalid("memory.dedup.confidence_threshold", "must be between 0 and 1");
        }
        if dedup.enabled && dedup.strategy != DedupStrategy::Content && dedup.window_minutes == 0 {
            return invalid("memory.dedup.window_minutes", "must be greater than 0");
        }

        for output in &self.outputs {
            match output {
                OutputDescriptor::File { path, .. } if path.trim().is_empty() => {
                    return invalid("outputs.path", "must not be empty");
                }
                OutputDescriptor::Webhook { url, .. }
                    if !(url.starts_with("http://") || url.starts_with("https://")) =>
                {
                    return invalid("outputs.url", "must be an http(s) URL");
                }
                _ => {}
            }
        }

        if let Some(name) = self.tools.strategy.as_deref() {
            if strategy_by_name(name).is_none() {
                return invalid("tools.strategy", "must be function_call, content_block or generic");
            }
        }
        if self.tools.enabled {
            if self.tools.timeout_secs == 0 {
                return invalid("tools.timeout_secs", "must be greater than 0");
            }
            for server in &self.tools.servers {
                if !(server.url.starts_with("http://") || server.url.starts_with("https://")) {
                    return invalid("tools.servers.url", "must be an http(s) URL");
                }
            }
        }

        if let Some(t) = self.options.temperature {
            if !(0.0..=2.0).contains(&t) {
                return invalid("options.temperature", "must be between 0 and 2");
            }
        }
        if self.options.timeout_secs == 0 {
            return invalid("options.timeout_secs", "must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return invalid("retry.jitter_factor", "must be between 0 and 1");
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.initial_delay_ms", "must not exceed max_delay_ms");
        }

        if let Some(pricing) = &self.pricing {
            if !pricing.is_valid() {
                return invalid("pricing", "prices must be finite and non-negative");
            }
        }

        Ok(())
    }

    /// The raw prompt template, inline or read from `prompt_file`.
    pub fn prompt_template(&self) -> Result<String, ConfigError> {
        if let Some(prompt) = self.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(prompt.to_string());
        }
        let Some(file) = &self.prompt_file else {
            return Err(ConfigError::InvalidValue(
                "prompt".to_string(),
                "either prompt or prompt_file is required".to_string(),
            ));
        };
        let path = self.task_dir.join(file);
        std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })
    }

    /// Absolute location of the memory artifact.
    pub fn memory_path(&self) -> PathBuf {
        self.task_dir.join(&self.memory.file)
    }

    /// Tool-call cap after applying the process-level override.
    pub fn effective_max_tool_calls(&self, global: Option<u32>) -> u32 {
        match global {
            Some(cap) => cap.min(self.tools.max_tool_calls),
            None => self.tools.max_tool_calls,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(name: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            prompt: Some("Hello from {{task_name}}".to_string()),
            prompt_file: None,
            schedule: None,
            memory: MemorySettings::default(),
            outputs: Vec::new(),
            tools: ToolSettings::default(),
            options: TaskOptions::default(),
            retry: RetryPolicy::default(),
            pricing: None,
            task_dir: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TASK: &str = r#"
name: daily-digest
provider: "openai:gpt-4o-mini"
schedule: "0 9 * * *"
prompt: |
  Summarize today's news for {{date}}.
memory:
  enabled: true
  strategy: extract
  dedup:
    enabled: true
    strategy: hybrid
    window_minutes: 60
outputs:
  - type: file
    path: "output/{{date}}.md"
  - type: file
    path: latest.json
    format: json
  - type: webhook
    url: https://hooks.example.com/digest
    headers:
      X-Token: abc
tools:
  enabled: true
  servers:
    - url: http://localhost:8080/mcp
options:
  temperature: 0.3
  max_tokens: 800
retry:
  max_attempts: 5
"#;

    #[test]
    fn test_parse_full_task() {
        let task = TaskConfig::from_yaml_str(FULL_TASK).unwrap();
        assert_eq!(task.name, "daily-digest");
        assert!(task.memory.enabled);
        assert_eq!(task.memory.strategy, UpdateStrategy::Extract);
        assert_eq!(task.memory.dedup.strategy, DedupStrategy::Hybrid);
        assert_eq!(task.memory.dedup.confidence_threshold, 0.7);
        assert_eq!(task.outputs.len(), 3);
        assert!(matches!(
            &task.outputs[1],
            OutputDescriptor::File { format: OutputFormat::Json, .. }
        ));
        assert!(matches!(&task.outputs[2], OutputDescriptor::Webhook { headers, .. } if headers["X-Token"] == "abc"));
        assert_eq!(task.tools.max_tool_calls, 5);
        assert_eq!(task.tools.timeout_secs, 30);
        assert_eq!(task.options.timeout_secs, 120);
        assert_eq!(task.retry.max_attempts, 5);
        assert_eq!(task.retry.initial_delay_ms, 1000);
    }

    #[test]
    fn test_defaults_for_minimal_task() {
        let task = TaskConfig::from_yaml_str("name: t\nprovider: ollama:llama3\nprompt: hi\n").unwrap();
        assert!(!task.memory.enabled);
        assert_eq!(task.memory.file, PathBuf::from("memory.md"));
        assert!(task.outputs.is_empty());
        assert_eq!(task.retry, RetryPolicy::default());
    }

    #[test]
    fn test_rejects_invalid_tasks() {
        let cases = [
            "name: ''\nprovider: openai:gpt-4o\nprompt: hi\n",
            "name: t\nprovider: gpt-4o\nprompt: hi\n",
            "name: t\nprovider: openai:gpt-4o\n",
            "name: t\nprovider: openai:gpt-4o\nprompt: hi\nmemory:\n  dedup:\n    confidence_threshold: 1.5\n",
            "name: t\nprovider: openai:gpt-4o\nprompt: hi\noutputs:\n  - type: webhook\n    url: ftp://x\n",
            "name: t\nprovider: openai:gpt-4o\nprompt: hi\nretry:\n  max_attempts: 0\n",
        ];
        for case in cases {
            assert!(TaskConfig::from_yaml_str(case).is_err(), "accepted: {case}");
        }
    }

    #[test]
    fn test_load_from_directory_with_prompt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("task.yml"),
            "name: t\nprovider: openai:gpt-4o\nprompt_file: prompt.md\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("prompt.md"), "From a file").unwrap();

        let task = TaskConfig::load(dir.path()).unwrap();
        assert_eq!(task.task_dir, dir.path());
        assert_eq!(task.prompt_template().unwrap(), "From a file");
        assert_eq!(task.memory_path(), dir.path().join("memory.md"));
    }

    #[test]
    fn test_load_missing_task() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            TaskConfig::load(dir.path()),
            Err(ConfigError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_effective_tool_cap() {
        let task = TaskConfig::for_test("t", "openai:gpt-4o");
        assert_eq!(task.effective_max_tool_calls(None), 5);
        assert_eq!(task.effective_max_tool_calls(Some(2)), 2);
        assert_eq!(task.effective_max_tool_calls(Some(50)), 5);
    }
}
