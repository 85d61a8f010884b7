//! MCP Client — JSON-RPC access to remote tool servers.
//!
//! This module handles:
//! - Server descriptors and their validation
//! - Transports: child-process stdio, streamable HTTP, legacy HTTP+SSE
//! - Short-lived connections (connect → call → disconnect) with timeouts
//! - Tool discovery and namespacing across servers
//!
//! The Tool Router uses the registry to dispatch `mcp.<server>.<tool>` calls.

pub mod connection;
pub mod errors;
pub mod registry;
pub mod sse;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use connection::{ConnectionManager, ConnectionState, McpConnection};
pub use errors::McpError;
pub use registry::{namespaced_tool_name, DiscoveryReport, McpRegistry};
pub use transport::{DefaultTransportFactory, McpTransport, TransportFactory};
pub use types::{CallToolResult, McpServerConfig, McpToolInfo, McpTransportKind};
