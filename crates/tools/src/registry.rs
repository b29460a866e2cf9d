//! Tool registry resolution: static tools plus optional remote discovery.
//!
//! [`ToolResolver::resolve`] never fails. A missing, slow, broken or
//! panicking remote provider yields [`Discovery::Fallback`] and the static
//! set alone.

use cerebro_core::event::{DomainEvent, EventBus};
use cerebro_core::tool::{RemoteToolProvider, Tool, ToolRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of remote tool discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// The provider answered with `count` tools (before name de-duplication).
    Connected { provider: String, count: usize },
    /// No remote tools; the registry holds the static set only.
    Fallback { provider: Option<String>, reason: String },
}

impl Discovery {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// One-line notice for a front end.
    pub fn notification(&self) -> String {
        match self {
            Self::Connected { provider, count } => format!("{provider} connected ({count} tools)"),
            Self::Fallback {
                provider: Some(provider),
                reason,
            } => format!("{provider} unavailable: {reason}. Running without its tools"),
            Self::Fallback { provider: None, reason } => reason.clone(),
        }
    }
}

/// A resolved tool snapshot together with how it was obtained.
pub struct Resolution {
    pub registry: ToolRegistry,
    pub discovery: Discovery,
}

pub struct ToolResolver {
    statics: Vec<Arc<dyn Tool>>,
    remote: Option<Arc<dyn RemoteToolProvider>>,
    discovery_timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolResolver {
    pub fn new(statics: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            statics,
            remote: None,
            discovery_timeout: Duration::from_secs(15),
            event_bus: None,
        }
    }

    pub fn with_remote(mut self, provider: Arc<dyn RemoteToolProvider>) -> Self {
        self.remote = Some(provider);
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Build the registry for a run: remote tools first, then statics.
    pub async fn resolve(&self) -> Resolution {
        let Some(remote) = &self.remote else {
            debug!("No remote tool provider configured");
            return Resolution {
                registry: ToolRegistry::compose(Vec::new(), self.statics.clone()),
                discovery: Discovery::Fallback {
                    provider: None,
                    reason: "remote tools disabled".into(),
                },
            };
        };

        let name = remote.name().to_string();
        let provider = Arc::clone(remote);
        // Spawned so a panicking provider is contained; aborting the task
        // drops the provider's in-flight connection.
        let mut task = tokio::spawn(async move { provider.list_tools().await });

        let outcome = match tokio::time::timeout(self.discovery_timeout, &mut task).await {
            Ok(Ok(Ok(tools))) => Ok(tools),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) => Err(format!("discovery task failed: {join_error}")),
            Err(_) => {
                task.abort();
                Err(format!(
                    "discovery timed out after {}s",
                    self.discovery_timeout.as_secs_f32()
                ))
            }
        };

        match outcome {
            Ok(remote_tools) => {
                let count = remote_tools.len();
                info!(provider = %name, count, "Remote tools connected");
                self.publish(DomainEvent::RemoteToolsConnected {
                    provider: name.clone(),
                    count,
                    timestamp: Utc::now(),
                });
                Resolution {
                    registry: ToolRegistry::compose(remote_tools, self.statics.clone()),
                    discovery: Discovery::Connected { provider: name, count },
                }
            }
            Err(reason) => {
                warn!(
                    provider = %name,
                    %reason,
                    "Remote tools unavailable, using static tools only"
                );
                self.publish(DomainEvent::RemoteToolsUnavailable {
                    provider: name.clone(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                Resolution {
                    registry: ToolRegistry::compose(Vec::new(), self.statics.clone()),
                    discovery: Discovery::Fallback {
                        provider: Some(name),
                        reason,
                    },
                }
            }
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
