//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the persisted
//! server descriptor.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::errors::McpError;

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Any inbound JSON-RPC message. Responses have an `id` and no `method`;
/// server-initiated requests and notifications carry a `method`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Whether this is the response to request `id`.
    pub fn answers(&self, id: u64) -> bool {
        self.method.is_none() && self.id == Some(id)
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A tool as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// `tools/list` response page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// `tools/call` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenated text of all `text` content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Server Descriptor ───────────────────────────────────────────────────────

/// How to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    /// Child process, JSON-RPC over stdin/stdout.
    Stdio,
    /// Streamable HTTP: POST per message.
    Http,
    /// Legacy HTTP+SSE: long-lived GET stream plus POST endpoint.
    Sse,
}

/// A configured MCP server.
///
/// `command`/`args`/`env` are used by `stdio`; `url` by `http` and `sse`.
/// Exactly one side is populated, checked by [`McpServerConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub transport: McpTransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-text note shown with the server's tools (e.g. "can write files").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities_warning: Option<String>,
    /// Gate every tool from this server behind user confirmation.
    #[serde(default)]
    pub requires_confirmation: bool,
}

fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Check the id pattern and that the fields match the transport.
    pub fn validate(&self) -> Result<(), McpError> {
        if !is_valid_server_id(&self.id) {
            return Err(McpError::ConfigError {
                reason: format!(
                    "server id '{}' must be 1-64 characters of [A-Za-z0-9_-]",
                    self.id
                ),
            });
        }

        let has_command = self.command.as_deref().is_some_and(|c| !c.trim().is_empty());
        let has_url = self.url.as_deref().is_some_and(|u| !u.trim().is_empty());

        match self.transport {
            McpTransportKind::Stdio => {
                if !has_command {
                    return Err(self.config_error("stdio transport requires 'command'"));
                }
                if has_url {
                    return Err(self.config_error("stdio transport must not set 'url'"));
                }
            }
            McpTransportKind::Http | McpTransportKind::Sse => {
                if has_command || !self.args.is_empty() || !self.env.is_empty() {
                    return Err(self.config_error(
                        "http/sse transport must not set 'command', 'args' or 'env'",
                    ));
                }
                self.parsed_url()?;
            }
        }
        Ok(())
    }

    /// The validated `url` for network transports.
    pub fn parsed_url(&self) -> Result<reqwest::Url, McpError> {
        let raw = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| self.config_error("http/sse transport requires 'url'"))?;

        let url = reqwest::Url::parse(raw)
            .map_err(|e| self.config_error(&format!("invalid url '{raw}': {e}")))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(self.config_error(&format!("url scheme '{other}' is not http(s)"))),
        }
    }

    fn config_error(&self, reason: &str) -> McpError {
        McpError::ConfigError {
            reason: format!("server '{}': {reason}", self.id),
        }
    }
}

fn is_valid_server_id(id: &str) -> bool {
    (1..=64).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate every descriptor and require unique ids.
pub fn validate_server_configs(servers: &[McpServerConfig]) -> Result<(), McpError> {
    let mut seen = HashSet::new();
    for server in servers {
        server.validate()?;
        if !seen.insert(server.id.as_str()) {
            return Err(McpError::ConfigError {
                reason: format!("duplicate server id '{}'", server.id),
            });
        }
    }
    Ok(())
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
