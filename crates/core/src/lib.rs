//! # Cerebro Core
//!
//! Domain types, traits, and error definitions for the Cerebro conversational
//! agent. This crate has **no I/O of its own**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here. Implementations live
//! in their respective crates:
//! - [`Provider`] — language model backends (`cerebro-providers`)
//! - [`Tool`] / [`RemoteToolProvider`] — capabilities (`cerebro-tools`)
//! - [`CheckpointStore`] — per-thread persistence (`cerebro-checkpoint`)
//!
//! The loop itself (`cerebro-agent`) only ever sees these traits, which keeps
//! it testable with scripted mocks.

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{CheckpointError, Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role, ToolCallRequest};
pub use provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage,
};
pub use state::ConversationState;
pub use tool::{RemoteToolProvider, Tool, ToolDescriptor, ToolOrigin, ToolRegistry, ToolResult};
