//! Persistent per-task memory.
//!
//! Memory lives in a single markdown file with a YAML frontmatter block:
//!
//! ```text
//! ---
//! lastRun: 2024-05-01T09:00:00Z
//! totalRuns: 3
//! ---
//! free-form markdown body
//! ```
//!
//! A missing file is an empty memory. Writes go to a temporary sibling file
//! that is renamed into place.

mod artifact;
mod strategy;

pub use artifact::{topics_from_markdown, validate_metadata, MemoryArtifact, MAX_TOPICS};
pub use strategy::{MemoryUpdate, UpdateRequest, UpdateStrategy};

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Failed to access memory file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed memory file: {0}")]
    Parse(String),

    #[error("Invalid memory metadata: {0}")]
    Validation(String),

    #[error("Memory extraction failed: {0}")]
    Extract(String),

    #[error("Memory extraction call failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Loads, updates and persists one task's memory file.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> MemoryError {
        MemoryError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read and validate the memory file; an absent file yields an empty artifact.
    pub async fn load(&self) -> Result<MemoryArtifact, MemoryError> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => {
                let artifact = MemoryArtifact::parse(&text)?;
                validate_metadata(&artifact.metadata)?;
                Ok(artifact)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No memory at {}, starting empty", self.path.display());
                Ok(MemoryArtifact::default())
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Validate, then write atomically.
    pub async fn save(&self, artifact: &MemoryArtifact) -> Result<(), MemoryError> {
        validate_metadata(&artifact.metadata)?;
        let text = artifact.render()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        fs::write(&tmp_path, text.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!("Saved memory to {}", self.path.display());
        Ok(())
    }

    /// Apply a strategy to `current` and return the new artifact.
    ///
    /// Does not write; call [`MemoryStore::save`] with the result.
    pub async fn update(
        &self,
        current: &MemoryArtifact,
        request: UpdateRequest<'_>,
    ) -> Result<MemoryUpdate, MemoryError> {
        let mut artifact = current.clone();
        let mut usage = None;
        let mut cost = None;

        match request.strategy {
            UpdateStrategy::Append => {
                artifact.body =
                    strategy::append_body(&current.body, request.new_content, request.timestamp);
            }
            UpdateStrategy::Replace => {
                artifact.body = request.new_content.to_string();
            }
            UpdateStrategy::Extract => {
                let provider = request.provider.ok_or_else(|| {
                    MemoryError::Extract("the extract strategy needs a provider".to_string())
                })?;
                let prompt = strategy::extract_prompt(&current.body, request.new_content);
                let response = provider
                    .call_with_system(&prompt, strategy::EXTRACT_SYSTEM_PROMPT)
                    .await?;

                let extracted = response.content.trim();
                if extracted.is_empty() {
                    return Err(MemoryError::Extract(
                        "model returned an empty memory document".to_string(),
                    ));
                }
                artifact.body = extracted.to_string();
                usage = Some(response.usage);
                cost = Some(response.cost);
            }
        }

        if let Some(overrides) = &request.metadata_overrides {
            artifact.merge_metadata(overrides);
        }

        let modified = artifact != *current;
        tracing::debug!(
            "Memory update ({}) for {}: modified={}",
            request.strategy,
            self.path.display(),
            modified
        );

        Ok(MemoryUpdate {
            artifact,
            modified,
            usage,
            cost,
        })
    }
}
