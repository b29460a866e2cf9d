//! MCP (Model Context Protocol) client over stdio.
//!
//! The remote tool server is a local executable speaking newline-delimited
//! JSON-RPC 2.0 on stdin/stdout. The client performs the `initialize`
//! handshake, lists tools with `tools/list` and invokes them with
//! `tools/call`. Every discovered tool holds an `Arc` to the client; the
//! child process is killed once the last of them is dropped.

use async_trait::async_trait;
use cerebro_core::error::ToolError;
use cerebro_core::tool::{RemoteToolProvider, Tool, ToolResult};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    reader: Reader,
    writer: Writer,
    /// A request was interrupted; the peer may hold a partial line.
    dirty: bool,
    _child: Option<Child>,
}

/// A JSON-RPC session with one MCP server.
pub struct McpClient {
    server: String,
    conn: Mutex<Connection>,
    next_id: AtomicU64,
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl McpClient {
    /// Spawn `program` and complete the MCP handshake.
    pub async fn spawn(server: &str, program: &Path, args: &[String]) -> Result<Self, ToolError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Unavailable(format!("failed to start {server}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Unavailable(format!("{server}: stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Unavailable(format!("{server}: stdout not captured")))?;

        let client = Self::new(server, Box::new(stdout), Box::new(stdin), Some(child));
        client.initialize().await?;
        Ok(client)
    }

    /// Wrap an already-connected transport. The handshake is not performed.
    pub fn from_transport(
        server: &str,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self::new(server, Box::new(reader), Box::new(writer), None)
    }

    fn new(
        server: &str,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Writer,
        child: Option<Child>,
    ) -> Self {
        Self {
            server: server.to_string(),
            conn: Mutex::new(Connection {
                reader: BufReader::new(reader),
                writer,
                dirty: false,
                _child: child,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// `initialize` followed by the `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<Value, ToolError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "cerebro", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        self.notify("notifications/initialized", json!({})).await?;
        debug!(server = %self.server, "MCP handshake complete");
        Ok(result)
    }

    /// All tools advertised by the server, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpToolSpec>, ToolError> {
        let mut specs = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: Vec<McpToolSpec> = serde_json::from_value(result["tools"].clone())
                .map_err(|e| {
                    ToolError::Protocol(format!(
                        "{}: malformed tools/list result: {e}",
                        self.server
                    ))
                })?;
            specs.extend(page);

            cursor = result["nextCursor"].as_str().map(str::to_string);
            if cursor.is_none() {
                return Ok(specs);
            }
        }
    }

    /// Invoke a tool. `isError: true` results become failed [`ToolResult`]s.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ToolError> {
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        let text = render_content(&result["content"]);
        let mut tool_result = if result["isError"].as_bool().unwrap_or(false) {
            ToolResult::failure(text)
        } else {
            ToolResult::ok(text)
        };
        if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
            tool_result = tool_result.with_data(structured.clone());
        }
        Ok(tool_result)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let mut conn = self.conn.lock().await;
        if conn.dirty {
            // Terminate whatever an interrupted request left behind.
            conn.writer.write_all(b"\n").await.map_err(|e| self.io_error(e))?;
        }
        conn.dirty = true;
        self.write_line(&mut conn.writer, &message).await?;

        loop {
            let mut line = String::new();
            let read = conn.reader.read_line(&mut line).await.map_err(|e| self.io_error(e))?;
            if read == 0 {
                return Err(ToolError::Unavailable(format!(
                    "{} closed the connection",
                    self.server
                )));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => {
                    debug!(server = %self.server, line, "Ignoring non-JSON output");
                    continue;
                }
            };
            // Notifications and stale responses from interrupted requests
            if response["id"].as_u64() != Some(id) {
                continue;
            }

            conn.dirty = false;
            if let Some(error) = response.get("error") {
                let message = error["message"].as_str().unwrap_or("unknown error");
                return Err(ToolError::Protocol(format!("{}: {method}: {message}", self.server)));
            }
            return Ok(response.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolError> {
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let mut conn = self.conn.lock().await;
        self.write_line(&mut conn.writer, &message).await
    }

    async fn write_line(&self, writer: &mut Writer, message: &Value) -> Result<(), ToolError> {
        let mut line = serde_json::to_vec(message).map_err(|e| ToolError::Protocol(e.to_string()))?;
        line.push(b'\n');
        writer.write_all(&line).await.map_err(|e| self.io_error(e))?;
        writer.flush().await.map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: std::io::Error) -> ToolError {
        ToolError::Unavailable(format!("{}: {e}", self.server))
    }
}

/// Flatten MCP content blocks into text. Non-text blocks are kept as JSON.
fn render_content(content: &Value) -> String {
    let Some(blocks) = content.as_array() else {
        return String::new();
    };
    blocks
        .iter()
        .map(|block| match (block["type"].as_str(), block["text"].as_str()) {
            (Some("text"), Some(text)) => text.to_string(),
            _ => block.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One remote tool, bound to the shared client.
pub struct McpTool {
    client: Arc<McpClient>,
    spec: McpToolSpec,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, spec: McpToolSpec) -> Self {
        Self { client, spec }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        self.spec.description.as_deref().unwrap_or("")
    }

    fn parameters_schema(&self) -> Value {
        self.spec.input_schema.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        self.client.call_tool(&self.spec.name, arguments).await
    }
}

/// Discovers a stdio MCP server on `PATH` and exposes its tools.
pub struct McpToolProvider {
    command: String,
    args: Vec<String>,
}

impl McpToolProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl RemoteToolProvider for McpToolProvider {
    fn name(&self) -> &str {
        &self.command
    }

    async fn list_tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let program = which::which(&self.command)
            .map_err(|_| ToolError::Unavailable(format!("{} not found in PATH", self.command)))?;
        debug!(command = %self.command, path = %program.display(), "Starting MCP server");

        let client = Arc::new(McpClient::spawn(&self.command, &program, &self.args).await?);
        let specs = client.list_tools().await?;
        if specs.is_empty() {
            warn!(server = %self.command, "MCP server advertised no tools");
        }
        info!(server = %self.command, count = specs.len(), "MCP tools discovered");

        Ok(specs
            .into_iter()
            .map(|spec| Arc::new(McpTool::new(Arc::clone(&client), spec)) as Arc<dyn Tool>)
            .collect())
    }
}
