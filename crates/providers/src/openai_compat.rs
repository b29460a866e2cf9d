//! OpenAI-compatible provider implementation.
//!
//! Works with OpenRouter (the default), OpenAI, Ollama, vLLM and any other
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling

use async_trait::async_trait;
use cerebro_core::error::ProviderError;
use cerebro_core::message::{Message, Role, ToolCallRequest};
use cerebro_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Upper bound on a single chat completion request, streaming included.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

fn build_client(timeout: std::time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let client = match build_client(REQUEST_TIMEOUT) {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    provider = %name,
                    error = %e,
                    "Failed to build HTTP client, using defaults without a timeout"
                );
                reqwest::Client::new()
            }
        };

        Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: encode_arguments(&tc.arguments),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let body = Self::request_body(&request, false);
        let response = self.post(&body, false).await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCallRequest::new(
                    tc.id,
                    tc.function.name,
                    decode_arguments(&tc.function.arguments),
                )
            })
            .collect();

        let message = Message::assistant_with_tool_calls(
            choice.message.content.unwrap_or_default(),
            tool_calls,
        );

        let usage = api_response.usage.map(Usage::from);

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");
        let body = Self::request_body(&request, true);
        let response = self.post(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream on a task; dropping the receiver ends it
        // at the next send and closes the HTTP response.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new(provider_name);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let err = ProviderError::StreamInterrupted(e.to_string());
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                for item in decoder.push(&bytes) {
                    let last = item.as_ref().map_or(true, |chunk| chunk.done);
                    if tx.send(item).await.is_err() || last {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]; flush what we have.
            let _ = tx.send(Ok(decoder.finish())).await;
        });

        Ok(rx)
    }
}

/// Incremental decoder for an OpenAI-style SSE body.
///
/// Emits content deltas as they arrive and a single `done` chunk carrying
/// every tool call, assembled from its fragments in index order. An error
/// event ends decoding with an `Err` in place of the `done` chunk.
struct SseDecoder {
    provider: String,
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
    finished: bool,
}

impl SseDecoder {
    fn new(provider: String) -> Self {
        Self {
            provider,
            buffer: Vec::new(),
            tool_calls: BTreeMap::new(),
            usage: None,
            finished: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        // Split on raw newlines so a multi-byte character spanning two
        // network reads is decoded intact.
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                out.push(Ok(self.finish()));
                return out;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    let errored = stream_resp
                        .choices
                        .iter()
                        .any(|c| c.finish_reason.as_deref() == Some("error"));
                    if stream_resp.error.is_some() || errored {
                        warn!(
                            provider = %self.provider,
                            data = %data,
                            "Provider sent an error event"
                        );
                        self.finished = true;
                        out.push(Err(stream_error(stream_resp.error)));
                        return out;
                    }

                    if let Some(choice) = stream_resp.choices.into_iter().next() {
                        for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
                            let acc = self.tool_calls.entry(tc_delta.index).or_default();
                            if let Some(id) = tc_delta.id {
                                acc.id = id;
                            }
                            if let Some(func) = tc_delta.function {
                                if let Some(name) = func.name {
                                    acc.name = name;
                                }
                                if let Some(args) = func.arguments {
                                    acc.arguments.push_str(&args);
                                }
                            }
                        }

                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            out.push(Ok(StreamChunk {
                                content: Some(content),
                                ..StreamChunk::default()
                            }));
                        }
                    }

                    if let Some(usage) = stream_resp.usage {
                        self.usage = Some(usage.into());
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %self.provider,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
        out
    }

    fn finish(&mut self) -> StreamChunk {
        self.finished = true;
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls)
                .into_values()
                .map(ToolCallAccumulator::into_tool_call)
                .collect(),
            done: true,
            usage: self.usage.take(),
        }
    }
}

/// Maps an in-stream error event to a provider error. OpenRouter puts the
/// upstream status in `code`; an error without one is treated as a bad gateway.
fn stream_error(error: Option<serde_json::Value>) -> ProviderError {
    let Some(error) = error else {
        return ProviderError::MalformedResponse(
            "stream finished with reason \"error\" and no error details".into(),
        );
    };
    let message = match &error {
        serde_json::Value::String(message) => message.clone(),
        other => other["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    };
    let status_code = error["code"]
        .as_u64()
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(502);
    ProviderError::ApiError {
        status_code,
        message,
    }
}

/// Arguments travel as a JSON-encoded string on the wire.
fn encode_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Unparseable argument text is preserved as a string for the tool to reject.
fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCallRequest {
        ToolCallRequest::new(self.id, self.name, decode_arguments(&self.arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn decode_all(body: &str) -> Vec<StreamChunk> {
        let mut decoder = SseDecoder::new("test".into());
        let mut chunks: Vec<StreamChunk> = decoder
            .push(body.as_bytes())
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        if !decoder.finished {
            chunks.push(decoder.finish());
        }
        chunks
    }

    /// Serve one HTTP response with the given content type and body.
    async fn serve_once(
        status: &'static str,
        content_type: &'static str,
        body: String,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16384];
            let mut seen = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&seen).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if seen.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\n\
                 content-type: {content_type}\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        url
    }

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url().contains("openrouter.ai"));
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new(
                "call_1",
                "web_search",
                serde_json::json!({"query": "rust"}),
            )],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "web_search");
        assert_eq!(tc[0].function.arguments, r#"{"query":"rust"}"#);
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "result data");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools[0].function.name, "web_search");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn streaming_body_requests_usage() {
        let request = ProviderRequest::new("m", vec![Message::user("hi")]);
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn decoder_emits_content_deltas_in_order() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"PO\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"NG\"}}]}\n\n\
                    data: [DONE]\n\n";
        let chunks = decode_all(body);
        let text: String = chunks.iter().filter_map(|c| c.content.clone()).collect();
        assert_eq!(text, "PONG");
        assert!(chunks.last().unwrap().done);
        assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
    }

    #[test]
    fn decoder_assembles_fragmented_tool_calls() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",",
            "\"function\":{\"name\":\"list_notes\",\"arguments\":\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",",
            "\"function\":{\"name\":\"web_search\",\"arguments\":\"{\\\"query\\\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"function\":{\"arguments\":\": \\\"rust\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[],",
            "\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n",
            "data: [DONE]\n",
        );
        let chunks = decode_all(body);
        assert_eq!(chunks.len(), 1);
        let done = &chunks[0];
        assert!(done.done);
        assert_eq!(done.tool_calls.len(), 2);
        assert_eq!(done.tool_calls[0].id, "call_a");
        assert_eq!(done.tool_calls[0].arguments["query"], "rust");
        assert_eq!(done.tool_calls[1].name, "list_notes");
        assert_eq!(done.tool_calls[1].arguments, serde_json::json!({}));
        assert_eq!(done.usage.as_ref().unwrap().total_tokens, 15);
    }

    #[test]
    fn decoder_handles_split_multibyte_characters() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new("test".into());
        assert!(decoder.push(&line[..split]).is_empty());
        let chunks = decoder.push(&line[split..]);
        assert_eq!(chunks[0].as_ref().unwrap().content.as_deref(), Some("héllo"));
    }

    #[test]
    fn decoder_ignores_comments_and_garbage() {
        let chunks = decode_all(
            ": keep-alive\n\ndata: not json\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(chunks[0].content.as_deref(), Some("ok"));
        assert!(chunks[1].done);
    }

    #[test]
    fn decoder_surfaces_mid_stream_error_event() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"error\":{\"code\":502,\"message\":\"upstream overloaded\"},",
            "\"choices\":[{\"delta\":{\"content\":\"\"},\"finish_reason\":\"error\"}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let mut decoder = SseDecoder::new("test".into());
        let items = decoder.push(body.as_bytes());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("Hel"));
        match &items[1] {
            Err(ProviderError::ApiError {
                status_code,
                message,
            }) => {
                assert_eq!(*status_code, 502);
                assert_eq!(message, "upstream overloaded");
            }
            other => panic!("expected an API error, got {other:?}"),
        }
        assert!(decoder.finished);
        assert!(decoder.push(b"data: [DONE]\n").is_empty());
    }

    #[test]
    fn error_finish_reason_without_details_is_malformed() {
        let mut decoder = SseDecoder::new("test".into());
        let items =
            decoder.push(b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"error\"}]}\n");
        assert!(matches!(
            items.as_slice(),
            [Err(ProviderError::MalformedResponse(_))]
        ));
    }

    #[test]
    fn invalid_arguments_are_kept_as_raw_text() {
        assert_eq!(decode_arguments("{oops"), serde_json::Value::String("{oops".into()));
        assert_eq!(encode_arguments(&serde_json::Value::String("{oops".into())), "{oops");
    }

    #[tokio::test]
    async fn complete_parses_tool_calls() {
        let body = serde_json::json!({
            "model": "anthropic/claude-haiku-4-5-20251001",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "web_search", "arguments": "{\"query\":\"x\"}"}
            }]}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })
        .to_string();
        let url = serve_once("200 OK", "application/json", body).await;
        let provider = OpenAiCompatProvider::new("test", url, "sk");

        let response = provider
            .complete(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert!(response.message.is_assistant());
        assert_eq!(response.message.tool_calls[0].name, "web_search");
        assert_eq!(response.message.tool_calls[0].arguments["query"], "x");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn stream_over_http() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"PONG\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .to_string();
        let url = serve_once("200 OK", "text/event-stream", body).await;
        let provider = OpenAiCompatProvider::new("test", url, "sk");

        let mut rx = provider
            .stream(ProviderRequest::new("m", vec![Message::user("ping")]).streaming())
            .await
            .unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("PONG"));
        assert!(rx.recv().await.unwrap().unwrap().done);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stream_error_event_over_http_ends_without_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"error\":{\"code\":502,\"message\":\"upstream overloaded\"},",
            "\"choices\":[{\"delta\":{},\"finish_reason\":\"error\"}]}\n\n",
        )
        .to_string();
        let url = serve_once("200 OK", "text/event-stream", body).await;
        let provider = OpenAiCompatProvider::new("test", url, "sk");

        let mut rx = provider
            .stream(ProviderRequest::new("m", vec![Message::user("hi")]).streaming())
            .await
            .unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("Hel"));
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 502, .. }));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn client_builds_with_request_timeout() {
        assert!(build_client(REQUEST_TIMEOUT).is_ok());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let url = serve_once("401 Unauthorized", "application/json", "{}".into()).await;
        let provider = OpenAiCompatProvider::new("test", url, "bad");
        let err = provider
            .complete(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }
}
