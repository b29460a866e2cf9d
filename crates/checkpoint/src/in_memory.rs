//! In-memory checkpoint store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cerebro_core::checkpoint::{Checkpoint, CheckpointStore};
use cerebro_core::error::CheckpointError;
use cerebro_core::state::ConversationState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps the latest checkpoint of every thread in a map. Nothing survives
/// the process.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with a checkpoint.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(thread_id).cloned())
    }

    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = Checkpoint::new(thread_id, state.clone());
        self.checkpoints
            .write()
            .await
            .insert(thread_id.to_string(), checkpoint.clone());
        Ok(checkpoint)
    }
}
