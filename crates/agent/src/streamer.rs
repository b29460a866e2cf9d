//! Folds a run's [`StreamEvent`]s into the view a front end renders.
//!
//! One [`EventStreamer`] per run. The view only ever grows: text is appended,
//! tools are appended once each, and a terminal event freezes it.

use crate::stream_event::StreamEvent;
use futures::{Stream, StreamExt};

/// Shown in place of an empty final answer.
pub const NO_RESPONSE: &str = "(no response)";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewStatus {
    #[default]
    Streaming,
    Done,
    Failed { detail: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamView {
    text: String,
    tools: Vec<String>,
    status: ViewStatus,
    final_text: Option<String>,
}

impl StreamView {
    /// Text accumulated from token deltas so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Tools started during the run, first-seen order, no repeats.
    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status != ViewStatus::Streaming
    }

    /// What a front end should show right now.
    ///
    /// A failed view keeps the partial text and appends the error.
    pub fn display_text(&self) -> String {
        match &self.status {
            ViewStatus::Streaming => self.text.clone(),
            ViewStatus::Done => match self.final_text.as_deref() {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => NO_RESPONSE.to_string(),
            },
            ViewStatus::Failed { detail } if self.text.is_empty() => format!("Error: {detail}"),
            ViewStatus::Failed { detail } => format!("{}\n\nError: {detail}", self.text),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventStreamer {
    view: StreamView,
}

impl EventStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Events after a terminal one are ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> &StreamView {
        if self.view.is_finished() {
            return &self.view;
        }
        match event {
            StreamEvent::TokenDelta { text } => self.view.text.push_str(text),
            StreamEvent::ToolStarted { name } => {
                if !self.view.tools.iter().any(|t| t == name) {
                    self.view.tools.push(name.clone());
                }
            }
            StreamEvent::ToolFinished { .. } => {}
            StreamEvent::Error { detail } => {
                self.view.status = ViewStatus::Failed { detail: detail.clone() };
            }
            StreamEvent::Done { final_text } => {
                self.view.final_text = Some(final_text.clone());
                self.view.status = ViewStatus::Done;
            }
        }
        &self.view
    }

    pub fn view(&self) -> &StreamView {
        &self.view
    }

    pub fn into_view(self) -> StreamView {
        self.view
    }

    /// Consume a whole event stream and return the final view.
    pub async fn fold<S>(events: S) -> StreamView
    where
        S: Stream<Item = StreamEvent>,
    {
        let mut streamer = Self::new();
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            streamer.apply(&event);
        }
        streamer.into_view()
    }

    /// Lazily map an event stream to the successive views it produces.
    pub fn views<S>(events: S) -> impl Stream<Item = StreamView>
    where
        S: Stream<Item = StreamEvent>,
    {
        events.scan(Self::new(), |streamer, event| {
            let view = streamer.apply(&event).clone();
            futures::future::ready(Some(view))
        })
    }
}
