//! Domain event system — notifications that sit outside a run's token stream.
//!
//! Discovery outcomes, tool executions, checkpoint writes and cancellations
//! are published here. Front ends subscribe to surface them as notices;
//! nothing in the loop depends on a subscriber being present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// Remote tool discovery succeeded
    RemoteToolsConnected {
        provider: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Remote tool discovery failed; the static set is used alone
    RemoteToolsUnavailable {
        provider: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A run's final state was written
    CheckpointSaved {
        thread_id: String,
        step_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A run was cancelled before completing
    RunCancelled {
        thread_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
