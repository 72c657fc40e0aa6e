//! cronagent - run one scheduled task.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use cronagent::analytics::JsonlRecorder;
use cronagent::llm::HttpProviderFactory;
use cronagent::{Config, RunnerContext, TaskConfig, TaskRunner};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Execute periodically scheduled LLM tasks.
#[derive(Parser)]
#[command(name = "cronagent", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task once.
    Run {
        /// Task name under the tasks directory, or a path to a task directory.
        task: String,
    },

    /// Load and validate a task without running it.
    Validate {
        task: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronagent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Run { task } => {
            let task_dir = config.resolve_task_dir(&task);
            info!("Analytics go to {}", config.analytics_file.display());

            let recorder = Arc::new(JsonlRecorder::new(config.analytics_file.clone()));
            let context = RunnerContext::new(config, Arc::new(HttpProviderFactory::new()), recorder);
            let outcome = TaskRunner::new(context).run(&task_dir).await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Validate { task } => {
            let task_dir = config.resolve_task_dir(&task);
            let task = TaskConfig::load(&task_dir)?;
            task.prompt_template()?;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "valid",
                    "task_name": task.name,
                    "provider": task.provider,
                    "task_dir": task_dir,
                }))?
            );
        }
    }

    Ok(())
}
