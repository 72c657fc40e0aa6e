use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{OutputError, OutputSink, TaskResult};
use crate::config::OutputFormat;

/// Writes the result to a file under the task directory.
///
/// The path may contain `{{date}}`, `{{timestamp}}` and `{{task_name}}`.
#[derive(Debug, Clone)]
pub struct FileSink {
    template: String,
    format: OutputFormat,
    base_dir: PathBuf,
}

impl FileSink {
    pub fn new(template: impl Into<String>, format: OutputFormat, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            format,
            base_dir: base_dir.into(),
        }
    }

    /// Expand placeholders and anchor relative paths at the base directory.
    pub fn resolve_path(&self, result: &TaskResult) -> PathBuf {
        let expanded = self
            .template
            .replace("{{date}}", &result.timestamp.format("%Y-%m-%d").to_string())
            .replace(
                "{{timestamp}}",
                &result.timestamp.format("%Y-%m-%dT%H-%M-%SZ").to_string(),
            )
            .replace("{{task_name}}", &result.task_name);

        let path = Path::new(&expanded);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn render(&self, result: &TaskResult) -> Result<String, OutputError> {
        match self.format {
            OutputFormat::Json => {
                let mut text = serde_json::to_string_pretty(result)?;
                text.push('\n');
                Ok(text)
            }
            OutputFormat::Markdown => Ok(render_markdown(result)),
        }
    }
}

fn render_markdown(result: &TaskResult) -> String {
    let meta = &result.metadata;
    let mut text = format!(
        "# {}\n\n*{} | {} ({}) | {} tokens | ${:.6} | {} ms*\n\n",
        result.task_name,
        result.timestamp.to_rfc3339(),
        meta.provider,
        meta.model,
        meta.tokens,
        meta.cost,
        meta.response_time_ms
    );
    if let Some(error) = &result.error {
        text.push_str(&format!("**Error:** {}\n\n", error));
    }
    text.push_str(result.response.trim_end());
    text.push('\n');
    text
}

#[async_trait]
impl OutputSink for FileSink {
    fn describe(&self) -> String {
        format!("file:{}", self.template)
    }

    async fn execute(&self, result: &TaskResult) -> Result<Option<String>, OutputError> {
        let path = self.resolve_path(result);
        let io_error = |source| OutputError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let contents = self.render(result)?;
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        fs::write(&tmp_path, contents).await.map_err(io_error)?;
        fs::rename(&tmp_path, &path).await.map_err(io_error)?;

        tracing::info!("Wrote output {}", path.display());
        Ok(Some(path.display().to_string()))
    }
}
