//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools come from two places: a static set compiled into the binary and an
//! optional remote provider discovered at run start. Both end up as
//! [`ToolDescriptor`]s inside an ordered [`ToolRegistry`] snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::message::ToolCallRequest;
use crate::provider::ToolDefinition;

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An optionally-present source of additional tools.
#[async_trait]
pub trait RemoteToolProvider: Send + Sync {
    /// Human-readable name used in notifications and logs.
    fn name(&self) -> &str;

    /// Connect (if needed) and list the tools this provider exposes.
    async fn list_tools(&self) -> std::result::Result<Vec<Arc<dyn Tool>>, ToolError>;
}

/// Where a tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    Static,
    Remote,
}

/// A tool together with its origin.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub tool: Arc<dyn Tool>,
    pub origin: ToolOrigin,
}

impl ToolDescriptor {
    pub fn new(tool: Arc<dyn Tool>, origin: ToolOrigin) -> Self {
        Self { tool, origin }
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name())
            .field("origin", &self.origin)
            .finish()
    }
}

/// An ordered, immutable-by-convention snapshot of the tools for one run.
///
/// Names are unique: when two descriptors share a name the one inserted
/// first is kept and later ones are dropped.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote descriptors first, then statics, first occurrence of a name wins.
    pub fn compose(remote: Vec<Arc<dyn Tool>>, statics: Vec<Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in remote {
            registry.register(tool, ToolOrigin::Remote);
        }
        for tool in statics {
            registry.register(tool, ToolOrigin::Static);
        }
        registry
    }

    /// Append a tool. Returns false (and keeps the existing one) on a name clash.
    pub fn register(&mut self, tool: Arc<dyn Tool>, origin: ToolOrigin) -> bool {
        if self.get(tool.name()).is_some() {
            tracing::debug!(tool = tool.name(), ?origin, "Dropping shadowed tool");
            return false;
        }
        self.tools.push(ToolDescriptor::new(tool, origin));
        true
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|d| d.name() == name)
    }

    /// Get all tool definitions (for sending to the LLM), in registry order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|d| d.tool.to_definition()).collect()
    }

    /// Execute a tool call.
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
    ) -> std::result::Result<ToolResult, ToolError> {
        let descriptor = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        descriptor.tool.execute(call.arguments.clone()).await
    }

    /// All registered tool names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|d| d.name()).collect()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
