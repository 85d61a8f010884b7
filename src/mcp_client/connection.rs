//! Short-lived MCP connections.
//!
//! Every use of a server pays the full lifecycle:
//! `disconnected → connecting → connected → (call)* → disconnecting → disconnected`.
//! There is no pooling. Connecting (transport creation plus the `initialize`
//! handshake) has its own timeout; each later operation gets an independent
//! operation timeout. Disconnect always runs and never fails the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use super::errors::McpError;
use super::transport::{DefaultTransportFactory, McpTransport, TransportFactory};
use super::types::{
    extract_result, CallToolResult, InitializeResult, ListToolsResult, McpServerConfig,
    McpToolInfo, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on `tools/list` pages, in case a server keeps returning cursors.
const MAX_LIST_PAGES: usize = 50;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─── McpConnection ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Disconnecting,
}

/// An initialized connection to one server. Only [`ConnectionManager::connect`]
/// creates one, so the connecting phase is never observable here.
pub struct McpConnection {
    server_id: String,
    transport: Box<dyn McpTransport>,
    operation_timeout: Duration,
    state: ConnectionState,
    server_info: InitializeResult,
}

impl McpConnection {
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    /// Run one JSON-RPC request under the operation timeout.
    async fn operation(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        if self.state != ConnectionState::Connected {
            return Err(McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("connection is {:?}", self.state),
            });
        }

        match tokio::time::timeout(self.operation_timeout, self.transport.request(method, params))
            .await
        {
            Ok(response) => extract_result(response?),
            Err(_) => Err(McpError::Timeout {
                server: self.server_id.clone(),
                operation: method.to_string(),
                timeout_ms: millis(self.operation_timeout),
            }),
        }
    }

    /// List every tool the server exposes, following pagination cursors.
    /// The whole listing shares one operation timeout.
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError> {
        let timeout = self.operation_timeout;
        let server_id = self.server_id.clone();
        let listing = async {
            let mut tools = Vec::new();
            let mut cursor: Option<String> = None;
            for _ in 0..MAX_LIST_PAGES {
                let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
                let value = self.operation("tools/list", params).await?;
                let page: ListToolsResult =
                    serde_json::from_value(value).map_err(|e| McpError::ProtocolError {
                        server: self.server_id.clone(),
                        reason: format!("invalid tools/list result: {e}"),
                    })?;
                tools.extend(page.tools);
                match page.next_cursor.filter(|c| !c.is_empty()) {
                    Some(next) => cursor = Some(next),
                    None => return Ok(tools),
                }
            }
            tracing::warn!(server = %self.server_id, "tools/list pagination limit reached");
            Ok(tools)
        };

        tokio::time::timeout(timeout, listing)
            .await
            .unwrap_or_else(|_| {
                Err(McpError::Timeout {
                    server: server_id,
                    operation: "tools/list".into(),
                    timeout_ms: millis(timeout),
                })
            })
    }

    /// Invoke a tool by its server-side name.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let value = self
            .operation("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;

        serde_json::from_value(value).map_err(|e| McpError::ProtocolError {
            server: self.server_id.clone(),
            reason: format!("invalid tools/call result: {e}"),
        })
    }

    /// Close the transport. Failures are logged, never returned.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnecting;

        match tokio::time::timeout(self.operation_timeout, self.transport.close()).await {
            Ok(Ok(())) => {
                tracing::debug!(server = %self.server_id, "MCP connection closed");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server_id, error = %e, "MCP disconnect failed");
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.server_id,
                    timeout_ms = millis(self.operation_timeout),
                    "MCP disconnect timed out"
                );
            }
        }

        self.state = ConnectionState::Disconnected;
    }
}

// ─── ConnectionManager ───────────────────────────────────────────────────────

/// Opens connections with the configured timeouts.
#[derive(Clone)]
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT)
    }
}

impl ConnectionManager {
    pub fn new(connect_timeout: Duration, operation_timeout: Duration) -> Self {
        Self::with_factory(
            Arc::new(DefaultTransportFactory),
            connect_timeout,
            operation_timeout,
        )
    }

    pub fn with_factory(
        factory: Arc<dyn TransportFactory>,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            connect_timeout,
            operation_timeout,
        }
    }

    /// Validate the descriptor, open a transport, and run the handshake.
    pub async fn connect(&self, config: &McpServerConfig) -> Result<McpConnection, McpError> {
        // Config problems surface here, never as network errors
        config.validate()?;

        tracing::debug!(server = %config.id, transport = ?config.transport, "connecting to MCP server");

        let handshake = async {
            let mut transport = self.factory.open(config).await?;
            match initialize(transport.as_mut(), &config.id).await {
                Ok(info) => Ok((transport, info)),
                Err(e) => {
                    if let Err(close_err) = transport.close().await {
                        tracing::warn!(
                            server = %config.id,
                            error = %close_err,
                            "failed to close transport after handshake error"
                        );
                    }
                    Err(e)
                }
            }
        };

        // On timeout the handshake future is dropped, and the transport with
        // it; transports release their process or socket on drop.
        let (transport, server_info) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| McpError::ConnectTimeout {
                server: config.id.clone(),
                timeout_ms: millis(self.connect_timeout),
            })??;

        tracing::info!(
            server = %config.id,
            server_name = ?server_info.server_info.as_ref().and_then(|i| i.name.as_deref()),
            protocol = ?server_info.protocol_version,
            "MCP server connected"
        );

        Ok(McpConnection {
            server_id: config.id.clone(),
            transport,
            operation_timeout: self.operation_timeout,
            state: ConnectionState::Connected,
            server_info,
        })
    }

    /// Connect, run `f`, and disconnect on every exit path.
    ///
    /// `f`'s result is returned unchanged; a disconnect failure is only logged.
    pub async fn with_connection<T, F>(
        &self,
        config: &McpServerConfig,
        f: F,
    ) -> Result<T, McpError>
    where
        F: for<'a> FnOnce(&'a mut McpConnection) -> BoxFuture<'a, Result<T, McpError>>,
    {
        let mut conn = self.connect(config).await?;
        let result = f(&mut conn).await;
        conn.disconnect().await;
        result
    }

    /// connect → `tools/list` → disconnect.
    pub async fn list_tools(&self, config: &McpServerConfig) -> Result<Vec<McpToolInfo>, McpError> {
        self.with_connection(config, |conn| Box::pin(conn.list_tools()))
            .await
    }

    /// connect → `tools/call` → disconnect.
    pub async fn call_tool(
        &self,
        config: &McpServerConfig,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let tool_name = tool_name.to_string();
        self.with_connection(config, move |conn| {
            Box::pin(async move { conn.call_tool(&tool_name, arguments).await })
        })
        .await
    }
}

/// `initialize` request followed by the `notifications/initialized` notification.
async fn initialize(
    transport: &mut dyn McpTransport,
    server_id: &str,
) -> Result<InitializeResult, McpError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "localchat",
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;
    let info: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::ProtocolError {
            server: server_id.to_string(),
            reason: format!("invalid initialize result: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;
    Ok(info)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
