//! CheckpointStore trait — durable mapping from thread id to latest state.
//!
//! One logical checkpoint per thread; `save` overwrites (last write wins).
//! Writers to different threads must not interfere. Concurrent writers to
//! the same thread are excluded by the run model, not by the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::state::ConversationState;

/// The durable snapshot of a thread's conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub state: ConversationState,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, state: ConversationState) -> Self {
        Self {
            thread_id: thread_id.into(),
            state,
            saved_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Backend name ("sqlite", "file", "in_memory").
    fn name(&self) -> &str;

    /// Latest checkpoint for the thread, or `None` if it has never been saved.
    async fn load(
        &self,
        thread_id: &str,
    ) -> std::result::Result<Option<Checkpoint>, CheckpointError>;

    /// Replace the thread's checkpoint with `state`.
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
    ) -> std::result::Result<Checkpoint, CheckpointError>;
}

/// Reject thread ids that are empty or could escape a storage namespace.
pub fn validate_thread_id(thread_id: &str) -> std::result::Result<(), CheckpointError> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id != "."
        && thread_id != ".."
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidThreadId(thread_id.to_string()))
    }
}
