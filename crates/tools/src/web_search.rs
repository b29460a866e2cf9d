//! Web search tool backed by the Tavily search API.
//!
//! Always registered. Without an API key every invocation fails with a
//! descriptive error, which the agent loop turns into a tool message the
//! model can react to.

use async_trait::async_trait;
use cerebro_core::error::ToolError;
use cerebro_core::tool::{Tool, ToolResult};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_results: u32,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
}

impl WebSearchTool {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, max_results: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            max_results: max_results.max(1),
        }
    }

    pub fn max_results(&self) -> u32 {
        self.max_results
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Use this for questions about current events \
         or topics not covered by the other tools."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "topic": {
                    "type": "string",
                    "description": "Search category",
                    "enum": ["general", "news"]
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let api_key = self.api_key.as_deref().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason: "TAVILY_API_KEY is not set".into(),
        })?;

        let body = SearchRequest {
            query,
            max_results: self.max_results,
            topic: arguments["topic"].as_str(),
        };
        debug!(query, max_results = self.max_results, "Web search");

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "web_search".into(),
                reason: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed {
                tool_name: "web_search".into(),
                reason: format!("search API returned {status}: {text}"),
            });
        }

        let data: serde_json::Value = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason: format!("invalid response: {e}"),
        })?;
        let output = serde_json::to_string_pretty(&data).unwrap_or_default();
        Ok(ToolResult::ok(output).with_data(data))
    }
}
