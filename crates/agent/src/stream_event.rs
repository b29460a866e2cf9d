//! Events emitted by a run, in order, for a presentation layer.
//!
//! The set is closed: a front end can match exhaustively. Within one run the
//! order of events is the order in which they happened.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A piece of assistant text.
    TokenDelta { text: String },

    /// A tool call is about to run.
    ToolStarted { name: String },

    /// A tool call finished (successfully or not).
    ToolFinished { id: String, name: String, success: bool },

    /// The run failed; no further events follow.
    Error { detail: String },

    /// The run completed; `final_text` is all assistant text streamed by it.
    Done { final_text: String },
}

impl StreamEvent {
    /// Event name, as used in logs and SSE-style framing.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TokenDelta { .. } => "token_delta",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// True for the events that end a run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = StreamEvent::TokenDelta { text: "Hello".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"token_delta","text":"Hello"}"#);
    }

    #[test]
    fn deserializes_tool_finished() {
        let json = r#"{"type":"tool_finished","id":"call_1","name":"web_search","success":false}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolFinished {
                id: "call_1".into(),
                name: "web_search".into(),
                success: false
            }
        );
        assert_eq!(event.event_type(), "tool_finished");
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::Done { final_text: String::new() }.is_terminal());
        assert!(StreamEvent::Error { detail: "x".into() }.is_terminal());
        assert!(!StreamEvent::ToolStarted { name: "x".into() }.is_terminal());
    }
}
