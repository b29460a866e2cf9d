//! Shared test helpers: a scripted provider, a few tools and two odd stores.

use async_trait::async_trait;
use cerebro_core::checkpoint::{Checkpoint, CheckpointStore};
use cerebro_core::error::{CheckpointError, ProviderError, ToolError};
use cerebro_core::message::ToolCallRequest;
use cerebro_checkpoint::InMemoryCheckpointStore;
use cerebro_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use cerebro_core::state::ConversationState;
use cerebro_core::tool::{Tool, ToolRegistry, ToolResult};
use cerebro_core::Message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// One scripted model turn.
#[derive(Clone)]
pub enum Script {
    /// Stream these text deltas, then finish.
    Text(Vec<String>),
    /// Finish with these tool calls and no text.
    ToolCalls(Vec<ToolCallRequest>),
    /// Stream a delta, then fail mid-stream.
    PartialThenError(String, ProviderError),
    /// Never answer.
    Hang,
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self::Text(vec![text.to_string()])
    }

    pub fn text_in_chunks(chunks: &[&str]) -> Self {
        Self::Text(chunks.iter().map(|c| c.to_string()).collect())
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::ToolCalls(calls)
    }

    pub fn partial_then_error(text: &str, error: ProviderError) -> Self {
        Self::PartialThenError(text.to_string(), error)
    }
}

/// A provider that plays back scripted turns and records every request.
///
/// Panics when asked for more turns than scripted, unless built with
/// [`ScriptedProvider::repeating`].
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Option<Script>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: watch::Sender<usize>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            calls: watch::channel(0).0,
        }
    }

    pub fn repeating(script: Script) -> Self {
        Self {
            repeat: Some(script),
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until `n` model calls have been received.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|calls| *calls >= n).await;
    }

    fn next_script(&self, request: ProviderRequest) -> Script {
        self.requests.lock().unwrap().push(request);
        self.calls.send_modify(|calls| *calls += 1);
        let next = self.scripts.lock().unwrap().pop_front();
        next.or_else(|| self.repeat.clone())
            .unwrap_or_else(|| panic!("ScriptedProvider: no more scripted turns"))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let message = match self.next_script(request) {
            Script::Text(chunks) => Message::assistant(chunks.concat()),
            Script::ToolCalls(calls) => Message::assistant_with_tool_calls("", calls),
            Script::PartialThenError(_, error) => return Err(error),
            Script::Hang => std::future::pending().await,
        };
        Ok(ProviderResponse {
            message,
            usage: None,
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let script = self.next_script(request);
        let (tx, rx) = mpsc::channel(16);
        match script {
            Script::Text(chunks) => {
                for chunk in chunks {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: Some(chunk),
                            ..StreamChunk::default()
                        }))
                        .await;
                }
                let _ = tx
                    .send(Ok(StreamChunk {
                        done: true,
                        ..StreamChunk::default()
                    }))
                    .await;
            }
            Script::ToolCalls(calls) => {
                let _ = tx
                    .send(Ok(StreamChunk {
                        tool_calls: calls,
                        done: true,
                        ..StreamChunk::default()
                    }))
                    .await;
            }
            Script::PartialThenError(text, error) => {
                let _ = tx
                    .send(Ok(StreamChunk {
                        content: Some(text),
                        ..StreamChunk::default()
                    }))
                    .await;
                let _ = tx.send(Err(error)).await;
            }
            Script::Hang => std::future::pending::<()>().await,
        }
        Ok(rx)
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the text argument"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(arguments["text"].as_str().unwrap_or_default()))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Sleeps for `ms` milliseconds, then returns `text`.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }
    fn description(&self) -> &str {
        "Sleep, then answer"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_millis(arguments["ms"].as_u64().unwrap_or(0))).await;
        Ok(ToolResult::ok(arguments["text"].as_str().unwrap_or_default()))
    }
}

pub fn echo_tool() -> Arc<dyn Tool> {
    Arc::new(EchoTool)
}

pub fn failing_tool() -> Arc<dyn Tool> {
    Arc::new(FailingTool)
}

pub fn sleep_tool() -> Arc<dyn Tool> {
    Arc::new(SleepTool)
}

pub fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    ToolRegistry::compose(Vec::new(), tools)
}

/// A store whose every operation fails.
pub struct BrokenStore;

#[async_trait]
impl CheckpointStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn load(&self, _thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Err(CheckpointError::Storage("database is locked".into()))
    }

    async fn save(
        &self,
        _thread_id: &str,
        _state: &ConversationState,
    ) -> Result<Checkpoint, CheckpointError> {
        Err(CheckpointError::Storage("database is locked".into()))
    }
}

/// An in-memory store whose saves block until [`GatedStore::open`].
pub struct GatedStore {
    pub inner: InMemoryCheckpointStore,
    saves_started: watch::Sender<usize>,
    open: watch::Sender<bool>,
}

impl Default for GatedStore {
    fn default() -> Self {
        Self {
            inner: InMemoryCheckpointStore::new(),
            saves_started: watch::channel(0).0,
            open: watch::channel(false).0,
        }
    }
}

impl GatedStore {
    /// Wait until `n` saves are blocked on (or past) the gate.
    pub async fn wait_for_saves(&self, n: usize) {
        let mut rx = self.saves_started.subscribe();
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }
}

#[async_trait]
impl CheckpointStore for GatedStore {
    fn name(&self) -> &str {
        "gated"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.load(thread_id).await
    }

    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
    ) -> Result<Checkpoint, CheckpointError> {
        self.saves_started.send_modify(|started| *started += 1);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        self.inner.save(thread_id, state).await
    }
}
