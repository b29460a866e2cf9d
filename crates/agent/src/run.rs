//! Run handles, cooperative cancellation and the one-run-per-thread policy.

use crate::loop_runner::{AgentLoop, RunOutcome};
use crate::stream_event::StreamEvent;
use cerebro_core::error::Error;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// A cloneable, idempotent cancellation flag.
///
/// The loop observes it at suspension points: before a model call, while
/// awaiting the model, around tool execution, and before the save.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// The events of one run. Ends after the terminal event, or as soon as the
/// run is cancelled, even if events are still buffered.
pub struct RunEvents {
    inner: UnboundedReceiverStream<StreamEvent>,
    cancel: CancelToken,
}

impl Stream for RunEvents {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// A live run: its event stream, its cancel switch and its result.
pub struct RunHandle {
    pub events: RunEvents,
    cancel: CancelToken,
    join: JoinHandle<Result<RunOutcome, Error>>,
    finished: watch::Receiver<bool>,
}

impl RunHandle {
    /// Request cancellation. Safe to call any number of times.
    ///
    /// Cancellation is honoured up to the moment the final checkpoint save
    /// begins. A cancel that lands while the save is in flight stops the
    /// event stream, but the save still completes and [`join`](Self::join)
    /// returns the persisted outcome rather than [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the run to end and return its outcome.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the run task (an internal invariant violation).
    pub async fn join(self) -> Result<RunOutcome, Error> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(Error::Internal(format!("run task failed: {e}"))),
        }
    }

    fn completion(&self) -> Completion {
        Completion(self.finished.clone())
    }
}

/// Resolves when a run's task has ended, however it ended.
struct Completion(watch::Receiver<bool>);

impl Completion {
    async fn wait(mut self) {
        // A dropped sender (panicked task) also counts as finished.
        let _ = self.0.wait_for(|done| *done).await;
    }

    fn is_done(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }
}

impl AgentLoop {
    /// Start a run on its own task.
    pub fn spawn(
        self: Arc<Self>,
        thread_id: impl Into<String>,
        user_text: impl Into<String>,
    ) -> RunHandle {
        let thread_id = thread_id.into();
        let user_text = user_text.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let result = self.run(&thread_id, &user_text, tx, &token).await;
            let _ = done_tx.send(true);
            result
        });

        RunHandle {
            events: RunEvents {
                inner: UnboundedReceiverStream::new(rx),
                cancel: cancel.clone(),
            },
            cancel,
            join,
            finished: done_rx,
        }
    }
}

struct ActiveRun {
    cancel: CancelToken,
    completion: Completion,
}

/// Keeps at most one run in flight per thread.
///
/// Submitting a message for a thread cancels that thread's previous run and
/// waits for it to wind down before starting the new one, so the new run
/// always starts from the last persisted checkpoint. Waiting happens outside
/// the lock; other threads are never held up by it.
pub struct ThreadRunner {
    agent: Arc<AgentLoop>,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl ThreadRunner {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent(&self) -> &Arc<AgentLoop> {
        &self.agent
    }

    pub async fn submit(&self, thread_id: &str, user_text: &str) -> RunHandle {
        loop {
            let previous = {
                let mut active = self.active.lock().await;
                active.retain(|_, run| !run.completion.is_done());
                match active.remove(thread_id) {
                    Some(previous) => previous,
                    None => {
                        // Spawned under the lock so a concurrent submit for
                        // the same thread sees this run and cancels it.
                        let handle = Arc::clone(&self.agent).spawn(thread_id, user_text);
                        active.insert(
                            thread_id.to_string(),
                            ActiveRun {
                                cancel: handle.cancel_token(),
                                completion: handle.completion(),
                            },
                        );
                        return handle;
                    }
                }
            };

            debug!(thread_id, "Cancelling previous run");
            previous.cancel.cancel();
            previous.completion.wait().await;
        }
    }

    /// Number of tracked runs that have not finished yet.
    pub async fn in_flight(&self) -> usize {
        let mut active = self.active.lock().await;
        active.retain(|_, run| !run.completion.is_done());
        active.len()
    }

    /// Cancel every in-flight run and wait for all of them to end.
    pub async fn shutdown(&self) {
        let runs: Vec<ActiveRun> = self
            .active
            .lock()
            .await
            .drain()
            .map(|(_, run)| run)
            .collect();
        for run in &runs {
            run.cancel.cancel();
        }
        for run in runs {
            run.completion.wait().await;
        }
    }
}
