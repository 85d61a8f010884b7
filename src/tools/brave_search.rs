//! `brave_search` — web search through the Brave Search API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{required_str, NativeTool, ToolContext, ToolError};
use crate::inference::types::ToolDefinition;

const TOOL_NAME: &str = "brave_search";

pub const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

const DEFAULT_COUNT: u64 = 5;
const MAX_COUNT: u64 = 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct BraveSearchTool {
    /// Build failure is kept and reported on each call.
    http: Result<reqwest::Client, String>,
    endpoint: String,
    api_key: Option<String>,
}

impl BraveSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_endpoint(BRAVE_SEARCH_URL, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client_builder(endpoint, api_key, reqwest::Client::builder())
    }

    fn with_client_builder(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        builder: reqwest::ClientBuilder,
    ) -> Self {
        let http = builder.timeout(REQUEST_TIMEOUT).build().map_err(|e| {
            tracing::warn!(tool = TOOL_NAME, error = %e, "failed to build HTTP client");
            format!("failed to build HTTP client: {e}")
        });
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Per-conversation key first, then the configured one.
    fn api_key<'a>(&'a self, ctx: &'a ToolContext) -> Option<&'a str> {
        ctx.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .or(self.api_key.as_deref())
    }
}

fn parse_count(args: &serde_json::Value) -> Result<u64, ToolError> {
    match args.get("count") {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_COUNT),
        Some(value) => match value.as_u64() {
            Some(n) if (1..=MAX_COUNT).contains(&n) => Ok(n),
            _ => Err(ToolError::invalid(
                TOOL_NAME,
                format!("'count' must be an integer between 1 and {MAX_COUNT}"),
            )),
        },
    }
}

// ─── Response ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Default, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
}

/// Trim the API payload down to what the model needs.
fn summarize(query: &str, response: SearchResponse) -> serde_json::Value {
    let results: Vec<_> = response
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .map(|r| {
            json!({
                "title": r.title,
                "url": r.url,
                "description": r.description.unwrap_or_default(),
            })
        })
        .collect();
    json!({ "query": query, "results": results })
}

#[async_trait]
impl NativeTool for BraveSearchTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            TOOL_NAME,
            "Search the web and return the top results with title, URL and snippet.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "count": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_COUNT,
                        "description": "Number of results (default 5)"
                    }
                },
                "required": ["query"]
            }),
            false,
        )
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = required_str(TOOL_NAME, args, "query")?;
        let count = parse_count(args)?;
        let api_key = self.api_key(ctx).ok_or_else(|| ToolError::MissingApiKey {
            tool: TOOL_NAME.to_string(),
        })?;

        let upstream = |reason: String| ToolError::Upstream {
            tool: TOOL_NAME.to_string(),
            reason,
        };

        let http = self.http.as_ref().map_err(|e| upstream(e.clone()))?;

        let count_param = count.to_string();
        let response = http
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count_param.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| upstream(format!("invalid response: {e}")))?;

        tracing::debug!(query, count, "brave_search completed");
        Ok(summarize(query, parsed))
    }
}
