//! The agent orchestration core for Cerebro.
//!
//! A run follows a **call model → route → call tools** cycle:
//!
//! 1. **Load** the thread's last checkpoint and append the user message
//! 2. **Call the model** with the rendered system prompt and full history
//! 3. **Route**: no tool calls ends the run, otherwise
//! 4. **Execute tools** concurrently, append their results, go back to 2
//! 5. **Persist** the final state
//!
//! The step budget decides when a model call is the last one; a reply that
//! still asks for tools at that point is replaced by a fixed apology and the
//! run stops. Everything a front end needs arrives as [`StreamEvent`]s,
//! which an [`EventStreamer`] folds into a renderable view.

pub mod budget;
pub mod loop_runner;
pub mod prompt;
pub mod run;
pub mod stream_event;
pub mod streamer;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use budget::{MaxSteps, StepBudget};
pub use loop_runner::{AgentLoop, FORCED_STOP_MESSAGE, LoopState, RunOutcome};
pub use prompt::render_system_prompt;
pub use run::{CancelToken, RunEvents, RunHandle, ThreadRunner};
pub use stream_event::StreamEvent;
pub use streamer::{EventStreamer, NO_RESPONSE, StreamView, ViewStatus};
