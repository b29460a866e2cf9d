//! The agent reasoning loop implementation.
//!
//! One run takes a user message through the states
//!
//! ```text
//! MODEL_CALL ──► ROUTE ──► TOOL_EXEC ──► MODEL_CALL ...
//!      │           └─────► END
//!      └─────────────────► FORCED_STOP
//! ```
//!
//! and persists the final state. A run that fails or is cancelled persists
//! nothing, so the next run resumes from the last good checkpoint.

use crate::budget::{MaxSteps, StepBudget};
use crate::prompt::render_system_prompt;
use crate::run::CancelToken;
use crate::stream_event::StreamEvent;
use cerebro_config::AppConfig;
use cerebro_core::checkpoint::CheckpointStore;
use cerebro_core::error::{Error, ToolError};
use cerebro_core::event::{DomainEvent, EventBus};
use cerebro_core::message::{Message, ToolCallRequest};
use cerebro_core::provider::{Provider, ProviderRequest};
use cerebro_core::state::ConversationState;
use cerebro_core::tool::ToolRegistry;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Replaces the model's reply when the step budget runs out mid tool use.
pub const FORCED_STOP_MESSAGE: &str =
    "Sorry, I could not find an answer to your question in the specified number of steps.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    ModelCall,
    Route,
    ToolExec,
    End,
    ForcedStop,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::ForcedStop)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ModelCall => "MODEL_CALL",
            Self::Route => "ROUTE",
            Self::ToolExec => "TOOL_EXEC",
            Self::End => "END",
            Self::ForcedStop => "FORCED_STOP",
        })
    }
}

/// The result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ConversationState,
    /// Every state visited, in order, ending with `End` or `ForcedStop`.
    pub trace: Vec<LoopState>,
    /// All assistant text streamed during the run.
    pub final_text: String,
    /// False when the checkpoint could not be written.
    pub persisted: bool,
}

impl RunOutcome {
    pub fn terminal_state(&self) -> LoopState {
        self.trace.last().copied().unwrap_or(LoopState::End)
    }

    /// Number of model calls made by the run.
    pub fn model_calls(&self) -> usize {
        self.trace.iter().filter(|s| **s == LoopState::ModelCall).count()
    }
}

/// Sends events for one run; goes quiet once the run is cancelled.
struct EventSink<'a> {
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: &'a CancelToken,
}

impl EventSink<'_> {
    fn emit(&self, event: StreamEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A departed consumer does not stop the run.
        let _ = self.tx.send(event);
    }
}

/// Drives the model / tool cycle for one thread at a time.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Tool snapshot shared by every run of this loop
    tools: ToolRegistry,

    store: Arc<dyn CheckpointStore>,

    model: String,
    temperature: f32,

    /// Template; `{system_time}` is filled in on every model call
    system_prompt: String,

    budget: Arc<dyn StepBudget>,
    tool_timeout: Duration,
    storage_timeout: Duration,

    event_bus: Option<Arc<EventBus>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let defaults = AppConfig::default();
        Self::from_config(&defaults, provider, tools, store)
    }

    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            model: config.model.clone(),
            temperature: config.provider.temperature,
            system_prompt: config.system_prompt.clone(),
            budget: Arc::new(MaxSteps(config.max_steps)),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            storage_timeout: Duration::from_secs(config.storage_timeout_secs),
            event_bus: None,
        }
    }

    pub fn with_budget(mut self, budget: impl StepBudget + 'static) -> Self {
        self.budget = Arc::new(budget);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_prompt = template.into();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Process one user message on `thread_id`.
    ///
    /// Events are sent on `events` as they happen. Returns
    /// [`Error::Cancelled`] if `cancel` fires first, or the provider error if
    /// the model call fails; in both cases nothing is persisted.
    pub async fn run(
        &self,
        thread_id: &str,
        user_text: &str,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, Error> {
        let sink = EventSink { tx: events, cancel };
        let result = self.run_inner(thread_id, user_text, &sink, cancel).await;
        match &result {
            Err(Error::Cancelled) => {
                info!(thread_id, "Run cancelled");
                self.publish(DomainEvent::RunCancelled {
                    thread_id: thread_id.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                error!(thread_id, error = %e, "Run failed");
                self.publish(DomainEvent::ErrorOccurred {
                    context: format!("run on {thread_id}"),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Ok(_) => {}
        }
        result
    }

    async fn run_inner(
        &self,
        thread_id: &str,
        user_text: &str,
        sink: &EventSink<'_>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, Error> {
        let (mut state, loaded) = self.load_state(thread_id, cancel).await?;
        info!(
            thread_id,
            history = state.messages.len(),
            tools = self.tools.len(),
            "Starting run"
        );

        state.step_count = 0;
        state.is_last_step = false;
        state.push(Message::user(user_text));

        let mut trace = Vec::new();
        let mut full_text = String::new();
        let mut current = LoopState::ModelCall;

        loop {
            trace.push(current);
            current = match current {
                LoopState::ModelCall => {
                    self.model_step(&mut state, sink, cancel, &mut full_text)
                        .await?
                }
                LoopState::Route => route(&state),
                LoopState::ToolExec => {
                    self.execute_tools(&mut state, sink, cancel).await?;
                    LoopState::ModelCall
                }
                LoopState::End | LoopState::ForcedStop => break,
            };
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Past this point the run commits even if cancelled.
        let persisted = if loaded {
            self.save_state(&state).await
        } else {
            warn!(
                thread_id,
                "History could not be loaded; not overwriting the stored checkpoint"
            );
            false
        };

        info!(
            thread_id,
            steps = state.step_count,
            outcome = %current,
            persisted,
            "Run finished"
        );
        sink.emit(StreamEvent::Done {
            final_text: full_text.clone(),
        });

        Ok(RunOutcome {
            state,
            trace,
            final_text: full_text,
            persisted,
        })
    }

    /// MODEL_CALL: one streamed model reply, appended to the history.
    async fn model_step(
        &self,
        state: &mut ConversationState,
        sink: &EventSink<'_>,
        cancel: &CancelToken,
        full_text: &mut String,
    ) -> Result<LoopState, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let step = state.step_count + 1;
        state.is_last_step = self.budget.is_last_step(step);
        debug!(thread_id = %state.thread_id, step, last = state.is_last_step, "Model call");

        // On the last step the reply may be discarded, so hold its text back
        // until we know it is kept.
        let buffered = state.is_last_step;
        let reply = match self.call_model(state, sink, cancel, buffered, full_text).await {
            Ok(reply) => reply,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                sink.emit(StreamEvent::Error { detail: e.to_string() });
                return Err(e);
            }
        };
        state.step_count = step;

        if state.is_last_step && reply.requests_tools() {
            warn!(
                thread_id = %state.thread_id,
                steps = step,
                pending = reply.tool_calls.len(),
                "Step budget exhausted with tool calls pending"
            );
            sink.emit(StreamEvent::TokenDelta {
                text: FORCED_STOP_MESSAGE.to_string(),
            });
            full_text.push_str(FORCED_STOP_MESSAGE);
            state.push(Message::assistant(FORCED_STOP_MESSAGE));
            return Ok(LoopState::ForcedStop);
        }

        if buffered && !reply.content.is_empty() {
            sink.emit(StreamEvent::TokenDelta {
                text: reply.content.clone(),
            });
            full_text.push_str(&reply.content);
        }
        state.push(reply);
        Ok(LoopState::Route)
    }

    async fn call_model(
        &self,
        state: &ConversationState,
        sink: &EventSink<'_>,
        cancel: &CancelToken,
        buffered: bool,
        full_text: &mut String,
    ) -> Result<Message, Error> {
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(Message::system(render_system_prompt(&self.system_prompt, Utc::now())));
        messages.extend(state.messages.iter().cloned());

        let mut request = ProviderRequest::new(&self.model, messages)
            .with_tools(self.tools.definitions())
            .streaming();
        request.temperature = self.temperature;

        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            rx = self.provider.stream(request) => rx?,
        };

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = rx.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                if !buffered {
                    sink.emit(StreamEvent::TokenDelta { text: delta.clone() });
                    full_text.push_str(&delta);
                }
                content.push_str(&delta);
            }
            tool_calls.extend(chunk.tool_calls);
            if chunk.done {
                break;
            }
        }

        Ok(Message::assistant_with_tool_calls(content, tool_calls))
    }

    /// TOOL_EXEC: run every requested call concurrently, append the results
    /// in request order.
    async fn execute_tools(
        &self,
        state: &mut ConversationState,
        sink: &EventSink<'_>,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let calls: Vec<ToolCallRequest> = state
            .last_message()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for call in &calls {
            sink.emit(StreamEvent::ToolStarted {
                name: call.name.clone(),
            });
        }

        let invocations =
            futures::future::join_all(calls.iter().map(|call| self.invoke_tool(call)));
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            results = invocations => results,
        };

        for (call, (content, success)) in calls.iter().zip(results) {
            sink.emit(StreamEvent::ToolFinished {
                id: call.id.clone(),
                name: call.name.clone(),
                success,
            });
            state.push(Message::tool_result(&call.id, content));
        }
        Ok(())
    }

    /// Invoke one tool; failures become message content, never errors.
    async fn invoke_tool(&self, call: &ToolCallRequest) -> (String, bool) {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.tool_timeout, self.tools.execute(call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.tool_timeout.as_secs(),
            }),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (content, success) = match result {
            Ok(r) if r.success => (r.output, true),
            Ok(r) => (format!("Error: {}", r.output), false),
            Err(e) => (format!("Error: {e}"), false),
        };

        if success {
            debug!(tool = %call.name, duration_ms, "Tool succeeded");
        } else {
            warn!(tool = %call.name, duration_ms, error = %content, "Tool failed");
        }
        self.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        (content, success)
    }

    /// Load the thread's history. The flag is false when the store failed
    /// and a fresh state was substituted.
    async fn load_state(
        &self,
        thread_id: &str,
        cancel: &CancelToken,
    ) -> Result<(ConversationState, bool), Error> {
        let load = tokio::time::timeout(self.storage_timeout, self.store.load(thread_id));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = load => result,
        };

        Ok(match result {
            Ok(Ok(Some(checkpoint))) => (checkpoint.state, true),
            Ok(Ok(None)) => (ConversationState::new(thread_id), true),
            Ok(Err(e)) => {
                warn!(
                    thread_id,
                    store = self.store.name(),
                    error = %e,
                    "Checkpoint load failed, starting fresh"
                );
                (ConversationState::new(thread_id), false)
            }
            Err(_) => {
                warn!(
                    thread_id,
                    store = self.store.name(),
                    timeout_secs = self.storage_timeout.as_secs(),
                    "Checkpoint load timed out, starting fresh"
                );
                (ConversationState::new(thread_id), false)
            }
        })
    }

    async fn save_state(&self, state: &ConversationState) -> bool {
        let thread_id = state.thread_id.as_str();
        match tokio::time::timeout(self.storage_timeout, self.store.save(thread_id, state)).await {
            Ok(Ok(checkpoint)) => {
                debug!(thread_id, saved_at = %checkpoint.saved_at, "Checkpoint saved");
                self.publish(DomainEvent::CheckpointSaved {
                    thread_id: thread_id.to_string(),
                    step_count: state.step_count,
                    timestamp: checkpoint.saved_at,
                });
                true
            }
            Ok(Err(e)) => {
                warn!(thread_id, store = self.store.name(), error = %e, "Checkpoint save failed");
                self.publish(DomainEvent::ErrorOccurred {
                    context: "checkpoint save".into(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                false
            }
            Err(_) => {
                warn!(thread_id, store = self.store.name(), "Checkpoint save timed out");
                false
            }
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// ROUTE: decide between another tool round and the end of the run.
///
/// # Panics
///
/// If the last message is not an assistant reply. MODEL_CALL always appends
/// one, so reaching this is a bug in the loop.
fn route(state: &ConversationState) -> LoopState {
    match state.last_message() {
        Some(message) if message.is_assistant() => {
            if message.requests_tools() {
                LoopState::ToolExec
            } else {
                LoopState::End
            }
        }
        other => panic!(
            "route reached without an assistant reply on thread {} (last role: {:?})",
            state.thread_id,
            other.map(|m| m.role)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use cerebro_checkpoint::InMemoryCheckpointStore;
    use cerebro_core::message::Role;
    use futures::StreamExt;

    fn store() -> Arc<InMemoryCheckpointStore> {
        Arc::new(InMemoryCheckpointStore::new())
    }

    async fn run_collect(
        agent: &AgentLoop,
        thread_id: &str,
        text: &str,
    ) -> (Result<RunOutcome, Error>, Vec<StreamEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = agent.run(thread_id, text, tx, &CancelToken::new()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    /// Every tool call is answered by exactly one tool message with its id,
    /// before the next assistant message.
    fn assert_tool_calls_resolved(state: &ConversationState) {
        let messages = &state.messages;
        for (i, message) in messages.iter().enumerate() {
            if !message.requests_tools() {
                continue;
            }
            let replies: Vec<&Message> = messages[i + 1..]
                .iter()
                .take_while(|m| m.role == Role::Tool)
                .collect();
            assert_eq!(replies.len(), message.tool_calls.len());
            for (call, reply) in message.tool_calls.iter().zip(replies) {
                assert_eq!(reply.tool_call_id.as_deref(), Some(call.id.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn pong_takes_one_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text_in_chunks(&[
            "PO", "NG",
        ])]));
        let agent = AgentLoop::new(provider.clone(), ToolRegistry::new(), store());

        let prompt = "Reply with exactly the word PONG and nothing else.";
        let (result, events) = run_collect(&agent, "chat-2026-01-01", prompt).await;
        let outcome = result.unwrap();

        assert_eq!(
            outcome.trace,
            vec![LoopState::ModelCall, LoopState::Route, LoopState::End]
        );
        assert_eq!(outcome.state.step_count, 1);
        assert!(outcome.final_text.to_lowercase().contains("pong"));
        assert!(outcome.persisted);
        assert_eq!(
            events,
            vec![
                StreamEvent::TokenDelta { text: "PO".into() },
                StreamEvent::TokenDelta { text: "NG".into() },
                StreamEvent::Done {
                    final_text: "PONG".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn one_tool_call_visits_expected_states() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![ToolCallRequest::new(
                "call_1",
                "echo",
                serde_json::json!({"text": "hi"}),
            )]),
            Script::text("Echoed: hi"),
        ]));
        let agent = AgentLoop::new(provider.clone(), registry(vec![echo_tool()]), store());

        let (result, events) = run_collect(&agent, "t1", "echo hi").await;
        let outcome = result.unwrap();

        assert_eq!(
            outcome.trace,
            vec![
                LoopState::ModelCall,
                LoopState::Route,
                LoopState::ToolExec,
                LoopState::ModelCall,
                LoopState::Route,
                LoopState::End
            ]
        );
        assert_eq!(outcome.model_calls(), 2);
        assert_eq!(outcome.state.step_count, 2);
        assert_tool_calls_resolved(&outcome.state);

        let tool_message = &outcome.state.messages[2];
        assert_eq!(tool_message.role, Role::Tool);
        assert_eq!(tool_message.content, "hi");
        assert!(events.contains(&StreamEvent::ToolStarted { name: "echo".into() }));
        assert!(events.contains(&StreamEvent::ToolFinished {
            id: "call_1".into(),
            name: "echo".into(),
            success: true
        }));

        // The second model call saw the tool result.
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.last().unwrap().role, Role::Tool);
        assert_eq!(requests[0].tools[0].name, "echo");
    }

    #[tokio::test]
    async fn system_prompt_is_rendered_first() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("ok")]));
        let agent = AgentLoop::new(provider.clone(), ToolRegistry::new(), store())
            .with_system_prompt("Be brief. Now: {system_time}");

        run_collect(&agent, "t", "hi").await.0.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.starts_with("Be brief. Now: 20"));
        assert!(!request.messages[0].content.contains("{system_time}"));
        assert!(request.stream);
    }

    #[tokio::test]
    async fn step_budget_forces_stop() {
        let provider = Arc::new(ScriptedProvider::repeating(Script::tool_calls(vec![
            ToolCallRequest::new("call_x", "echo", serde_json::json!({"text": "again"})),
        ])));
        let agent = AgentLoop::new(provider.clone(), registry(vec![echo_tool()]), store())
            .with_budget(MaxSteps(3));

        let (result, events) = run_collect(&agent, "t", "loop forever").await;
        let outcome = result.unwrap();

        assert_eq!(outcome.terminal_state(), LoopState::ForcedStop);
        assert_eq!(outcome.model_calls(), 3);
        assert_eq!(provider.requests().len(), 3);
        assert_eq!(outcome.state.step_count, 3);
        assert!(outcome.state.is_last_step);

        let last = outcome.state.last_message().unwrap();
        assert_eq!(last.content, FORCED_STOP_MESSAGE);
        assert!(last.tool_calls.is_empty());
        assert_eq!(outcome.state.tool_message_count(), 2);
        assert_tool_calls_resolved(&outcome.state);

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                final_text: FORCED_STOP_MESSAGE.into()
            })
        );
    }

    #[tokio::test]
    async fn last_step_text_reply_is_kept() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text_in_chunks(&[
            "fi", "nal",
        ])]));
        let agent =
            AgentLoop::new(provider, ToolRegistry::new(), store()).with_budget(MaxSteps(1));

        let (result, events) = run_collect(&agent, "t", "hi").await;
        let outcome = result.unwrap();

        assert_eq!(outcome.terminal_state(), LoopState::End);
        assert_eq!(outcome.final_text, "final");
        // Buffered on the last step, then released in one piece.
        assert_eq!(events[0], StreamEvent::TokenDelta { text: "final".into() });
    }

    #[tokio::test]
    async fn tool_failures_become_messages() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![
                ToolCallRequest::new("a", "fail", serde_json::json!({})),
                ToolCallRequest::new("b", "does_not_exist", serde_json::json!({})),
                ToolCallRequest::new("c", "echo", serde_json::json!({"text": "still here"})),
            ]),
            Script::text("recovered"),
        ]));
        let agent = AgentLoop::new(provider, registry(vec![echo_tool(), failing_tool()]), store());

        let outcome = run_collect(&agent, "t", "go").await.0.unwrap();
        let tool_messages: Vec<&Message> = outcome
            .state
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();

        assert_eq!(tool_messages.len(), 3);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("a"));
        assert!(tool_messages[0].content.starts_with("Error: "));
        assert!(tool_messages[1].content.contains("Tool not found: does_not_exist"));
        assert_eq!(tool_messages[2].content, "still here");
        assert_eq!(outcome.final_text, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_tools_run_concurrently_and_keep_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![
                ToolCallRequest::new(
                    "slow",
                    "sleep",
                    serde_json::json!({"ms": 300, "text": "first"}),
                ),
                ToolCallRequest::new(
                    "fast",
                    "sleep",
                    serde_json::json!({"ms": 100, "text": "second"}),
                ),
            ]),
            Script::text("done"),
        ]));
        let agent = AgentLoop::new(provider, registry(vec![sleep_tool()]), store());

        let started = tokio::time::Instant::now();
        let outcome = run_collect(&agent, "t", "go").await.0.unwrap();

        assert!(started.elapsed() < Duration::from_millis(400));
        let contents: Vec<&str> = outcome
            .state
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, ["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_tool_times_out_as_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![ToolCallRequest::new(
                "h",
                "sleep",
                serde_json::json!({"ms": 600_000}),
            )]),
            Script::text("moved on"),
        ]));
        let agent = AgentLoop::new(provider, registry(vec![sleep_tool()]), store())
            .with_tool_timeout(Duration::from_secs(2));

        let outcome = run_collect(&agent, "t", "go").await.0.unwrap();
        let tool_message = &outcome.state.messages[2];
        assert!(tool_message.content.starts_with("Error: "));
        assert!(tool_message.content.contains("timed out"));
        assert_eq!(outcome.terminal_state(), LoopState::End);
    }

    #[tokio::test]
    async fn provider_failure_is_fatal_and_not_persisted() {
        let store = store();
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("first answer")]));
        let agent = AgentLoop::new(provider, ToolRegistry::new(), store.clone());
        run_collect(&agent, "t", "one").await.0.unwrap();
        let before = store.load("t").await.unwrap().unwrap().state;

        let failing = Arc::new(ScriptedProvider::new(vec![Script::partial_then_error(
            "half an ans",
            cerebro_core::error::ProviderError::StreamInterrupted("connection reset".into()),
        )]));
        let agent = AgentLoop::new(failing, ToolRegistry::new(), store.clone());
        let (result, events) = run_collect(&agent, "t", "two").await;

        assert!(matches!(result, Err(Error::Provider(_))));
        assert_eq!(events[0], StreamEvent::TokenDelta { text: "half an ans".into() });
        match events.last().unwrap() {
            StreamEvent::Error { detail } => assert!(detail.contains("connection reset")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(store.load("t").await.unwrap().unwrap().state, before);
    }

    #[tokio::test]
    async fn error_event_mid_stream_is_fatal_and_not_persisted() {
        let store = store();
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("first answer")]));
        let agent = AgentLoop::new(provider, ToolRegistry::new(), store.clone());
        run_collect(&agent, "t", "one").await.0.unwrap();
        let before = store.load("t").await.unwrap().unwrap().state;

        let overloaded = cerebro_core::error::ProviderError::ApiError {
            status_code: 502,
            message: "upstream overloaded".into(),
        };
        let failing = Arc::new(ScriptedProvider::new(vec![Script::partial_then_error(
            "Hel", overloaded,
        )]));
        let agent = AgentLoop::new(failing, ToolRegistry::new(), store.clone());
        let (result, events) = run_collect(&agent, "t", "two").await;

        assert!(matches!(result, Err(Error::Provider(_))));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
        match events.last().unwrap() {
            StreamEvent::Error { detail } => assert!(detail.contains("upstream overloaded")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(store.load("t").await.unwrap().unwrap().state, before);
    }

    #[tokio::test]
    async fn history_accumulates_across_runs() {
        let store = store();
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::text("one"),
            Script::text("two"),
        ]));
        let agent = AgentLoop::new(provider.clone(), ToolRegistry::new(), store.clone());

        run_collect(&agent, "t", "first").await.0.unwrap();
        let outcome = run_collect(&agent, "t", "second").await.0.unwrap();

        assert_eq!(outcome.state.messages.len(), 4);
        assert_eq!(outcome.state.step_count, 1);
        assert_eq!(provider.requests()[1].messages.len(), 4); // system + 3 history
        let saved = store.load("t").await.unwrap().unwrap();
        assert_eq!(saved.state, outcome.state);
    }

    #[tokio::test]
    async fn load_failure_degrades_without_overwriting() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("still answering")]));
        let agent = AgentLoop::new(provider, ToolRegistry::new(), Arc::new(BrokenStore));

        let (result, events) = run_collect(&agent, "t", "hi").await;
        let outcome = result.unwrap();
        assert_eq!(outcome.final_text, "still answering");
        assert!(!outcome.persisted);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn events_feed_the_streamer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tool_calls(vec![
                ToolCallRequest::new("1", "echo", serde_json::json!({"text": "x"})),
                ToolCallRequest::new("2", "echo", serde_json::json!({"text": "y"})),
            ]),
            Script::text("Both echoed."),
        ]));
        let agent = AgentLoop::new(provider, registry(vec![echo_tool()]), store());
        let (_, events) = run_collect(&agent, "t", "go").await;

        let view = crate::streamer::EventStreamer::fold(futures::stream::iter(events)).await;
        assert_eq!(view.tools(), ["echo"]);
        assert_eq!(view.display_text(), "Both echoed.");
    }

    #[tokio::test]
    async fn cancelled_run_emits_nothing_more_and_saves_nothing() {
        let store = store();
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Hang]));
        let agent = Arc::new(AgentLoop::new(
            provider.clone(),
            ToolRegistry::new(),
            store.clone(),
        ));

        let mut handle = Arc::clone(&agent).spawn("t", "hello");
        provider.wait_for_calls(1).await;
        handle.cancel();
        handle.cancel();

        assert!(handle.events.next().await.is_none());
        assert!(matches!(handle.join().await, Err(Error::Cancelled)));
        assert!(store.load("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_while_tools_run_saves_nothing() {
        let store = store();
        let provider = Arc::new(ScriptedProvider::new(vec![Script::tool_calls(vec![
            ToolCallRequest::new("c1", "sleep", serde_json::json!({"ms": 60_000, "text": "late"})),
        ])]));
        let agent = Arc::new(AgentLoop::new(
            provider.clone(),
            registry(vec![sleep_tool()]),
            store.clone(),
        ));

        let mut handle = Arc::clone(&agent).spawn("t", "take a nap");
        assert_eq!(
            handle.events.next().await,
            Some(StreamEvent::ToolStarted {
                name: "sleep".into()
            })
        );
        handle.cancel();

        assert!(handle.events.next().await.is_none());
        assert!(matches!(handle.join().await, Err(Error::Cancelled)));
        assert!(store.load("t").await.unwrap().is_none());
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancel_during_save_still_commits() {
        let store = Arc::new(GatedStore::default());
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("kept")]));
        let agent = Arc::new(AgentLoop::new(provider, ToolRegistry::new(), store.clone()));

        let mut handle = Arc::clone(&agent).spawn("t", "hi");
        store.wait_for_saves(1).await;
        handle.cancel();
        store.open();

        assert!(handle.events.next().await.is_none());
        let outcome = handle.join().await.unwrap();
        assert!(outcome.persisted);
        let saved = store.inner.load("t").await.unwrap().unwrap();
        assert_eq!(saved.state.last_assistant_text(), Some("kept"));
    }

    #[test]
    #[should_panic(expected = "route reached without an assistant reply")]
    fn route_panics_on_non_assistant_message() {
        let mut state = ConversationState::new("t");
        state.push(Message::user("hi"));
        route(&state);
    }

    #[test]
    fn state_names() {
        assert_eq!(LoopState::ModelCall.to_string(), "MODEL_CALL");
        assert_eq!(LoopState::ForcedStop.to_string(), "FORCED_STOP");
        assert!(LoopState::End.is_terminal());
        assert!(!LoopState::Route.is_terminal());
    }
}
