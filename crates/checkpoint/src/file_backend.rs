//! File-based checkpoint store — one JSON document per thread.
//!
//! Layout: `<root>/<thread_id>.json`. Writes go to a sibling temp file which
//! is then renamed over the target, so a crash mid-write leaves the previous
//! checkpoint intact. Human-inspectable and dependency-free.

use async_trait::async_trait;
use cerebro_core::checkpoint::{Checkpoint, CheckpointStore, validate_thread_id};
use cerebro_core::error::CheckpointError;
use cerebro_core::state::ConversationState;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A directory of JSON checkpoint files.
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under a data directory: `<data_dir>/threads`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("threads"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_thread_id(thread_id)?;
        Ok(self.root.join(format!("{thread_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(thread_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Corrupted checkpoint file");
            CheckpointError::Serialization(e.to_string())
        })?;
        debug!(thread_id, messages = checkpoint.state.messages.len(), "Loaded checkpoint");
        Ok(Some(checkpoint))
    }

    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
    ) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(thread_id)?;
        let checkpoint = Checkpoint::new(thread_id, state.clone());
        let json = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to create checkpoint directory: {e}"))
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| {
                CheckpointError::Storage(format!("Failed to write {}: {e}", tmp.display()))
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| {
                CheckpointError::Storage(format!("Failed to replace {}: {e}", path.display()))
            })?;

        debug!(thread_id, path = %path.display(), "Saved checkpoint");
        Ok(checkpoint)
    }
}
