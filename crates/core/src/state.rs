//! Conversation state carried through the agent loop and persisted per thread.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

/// The full state of one thread.
///
/// `messages` is append-only. `step_count` counts model calls made by the
/// run that produced this state; `is_last_step` is set from outside the loop
/// by the step budget policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,

    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub step_count: u32,

    #[serde(default)]
    pub is_last_step: bool,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            step_count: 0,
            is_last_step: false,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of tool result messages in the history.
    pub fn tool_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }

    /// The text of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.content.as_str())
    }
}
