//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server descriptor is missing a required field or has an invalid one.
    /// Raised before any connection attempt.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },

    /// A stdio server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// Transport creation plus the initialize handshake exceeded the connect timeout.
    #[error("connecting to server '{server}' timed out after {timeout_ms}ms")]
    ConnectTimeout {
        server: String,
        timeout_ms: u64,
    },

    /// A single operation (list-tools, call-tool) exceeded its timeout.
    #[error("{operation} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// JSON-RPC communication error (I/O, HTTP failure, closed stream).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server answered with something that is not valid MCP.
    #[error("protocol error from server '{server}': {reason}")]
    ProtocolError {
        server: String,
        reason: String,
    },

    /// The referenced server exists but is switched off.
    #[error("MCP server '{server}' is disabled")]
    ServerDisabled {
        server: String,
    },

    /// No server with this id is configured.
    #[error("unknown MCP server: '{server}'")]
    UnknownServer {
        server: String,
    },
}

impl McpError {
    /// Whether this is a connect or operation timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::ConnectTimeout { .. } | McpError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_distinguishable() {
        let connect = McpError::ConnectTimeout {
            server: "fs".into(),
            timeout_ms: 10_000,
        };
        let op = McpError::Timeout {
            server: "fs".into(),
            operation: "tools/call".into(),
            timeout_ms: 30_000,
        };
        let proto = McpError::ProtocolError {
            server: "fs".into(),
            reason: "bad".into(),
        };
        assert!(connect.is_timeout());
        assert!(op.is_timeout());
        assert!(!proto.is_timeout());
        assert!(connect.to_string().contains("connecting"));
        assert!(op.to_string().contains("tools/call"));
    }

    #[test]
    fn test_disabled_names_server() {
        let err = McpError::ServerDisabled {
            server: "github".into(),
        };
        assert_eq!(err.to_string(), "MCP server 'github' is disabled");
    }
}
