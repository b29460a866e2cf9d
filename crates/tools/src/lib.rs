//! Tool implementations and registry resolution for Cerebro.
//!
//! Two kinds of tools reach the agent:
//! - static tools built into the binary (currently `web_search`)
//! - remote tools discovered at startup from an MCP server over stdio
//!   (`brain-mcp` by default)
//!
//! [`ToolResolver`] merges them into one [`ToolRegistry`](cerebro_core::ToolRegistry)
//! and falls back to the static set when discovery fails.

pub mod mcp;
pub mod registry;
pub mod web_search;

pub use mcp::{McpClient, McpTool, McpToolProvider};
pub use registry::{Discovery, Resolution, ToolResolver};
pub use web_search::WebSearchTool;

use cerebro_config::AppConfig;
use cerebro_core::event::EventBus;
use cerebro_core::tool::Tool;
use std::sync::Arc;
use std::time::Duration;

/// The tools that are always available, regardless of remote discovery.
pub fn static_tools(config: &AppConfig) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(WebSearchTool::new(
        config.search.base_url.clone(),
        config.search.api_key.clone(),
        config.max_search_results,
    ))]
}

/// Build a resolver wired to the configured remote tool server.
pub fn resolver_from_config(config: &AppConfig, event_bus: Option<Arc<EventBus>>) -> ToolResolver {
    let mut resolver = ToolResolver::new(static_tools(config)).with_discovery_timeout(
        Duration::from_secs(config.remote_tools.discovery_timeout_secs),
    );
    if config.remote_tools.enabled {
        resolver = resolver.with_remote(Arc::new(McpToolProvider::new(
            config.remote_tools.command.clone(),
            config.remote_tools.args.clone(),
        )));
    }
    if let Some(bus) = event_bus {
        resolver = resolver.with_event_bus(bus);
    }
    resolver
}
