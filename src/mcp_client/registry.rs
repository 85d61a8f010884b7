//! MCP server registry — the configured servers and their tools.
//!
//! Provides:
//! - Server lookup by id, with disabled servers reported explicitly
//! - Tool discovery across enabled servers (connect → `tools/list` → disconnect)
//! - Namespacing of remote tools as `mcp.<server_id>.<tool_name>`
//! - Tool invocation through a fresh connection per call

use crate::inference::types::ToolDefinition;

use super::connection::ConnectionManager;
use super::errors::McpError;
use super::types::{validate_server_configs, CallToolResult, McpServerConfig, McpToolInfo};

/// Prefix shared by every namespaced MCP tool name.
pub const MCP_TOOL_PREFIX: &str = "mcp";

/// `mcp.<server_id>.<tool_name>`.
pub fn namespaced_tool_name(server_id: &str, tool_name: &str) -> String {
    format!("{MCP_TOOL_PREFIX}.{server_id}.{tool_name}")
}

/// Outcome of a discovery pass. One failing server never hides the others.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub tools: Vec<ToolDefinition>,
    /// `(server_id, error message)` for each server that could not be listed.
    pub failures: Vec<(String, String)>,
}

// ─── McpRegistry ─────────────────────────────────────────────────────────────

pub struct McpRegistry {
    servers: Vec<McpServerConfig>,
    connections: ConnectionManager,
}

impl McpRegistry {
    /// Build a registry; descriptors are validated up front.
    pub fn new(
        servers: Vec<McpServerConfig>,
        connections: ConnectionManager,
    ) -> Result<Self, McpError> {
        validate_server_configs(&servers)?;
        Ok(Self {
            servers,
            connections,
        })
    }

    pub fn servers(&self) -> &[McpServerConfig] {
        &self.servers
    }

    /// Look up a server by id.
    pub fn server(&self, id: &str) -> Result<&McpServerConfig, McpError> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| McpError::UnknownServer {
                server: id.to_string(),
            })
    }

    /// Look up a server that is allowed to be called.
    pub fn enabled_server(&self, id: &str) -> Result<&McpServerConfig, McpError> {
        let server = self.server(id)?;
        if !server.enabled {
            return Err(McpError::ServerDisabled {
                server: id.to_string(),
            });
        }
        Ok(server)
    }

    /// Raw tool list for one server.
    pub async fn list_server_tools(&self, id: &str) -> Result<Vec<McpToolInfo>, McpError> {
        let server = self.enabled_server(id)?;
        self.connections.list_tools(server).await
    }

    /// List tools from every enabled server as namespaced definitions.
    pub async fn discover_tools(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for server in self.servers.iter().filter(|s| s.enabled) {
            match self.connections.list_tools(server).await {
                Ok(tools) => {
                    tracing::info!(server = %server.id, tools = tools.len(), "discovered MCP tools");
                    report
                        .tools
                        .extend(tools.iter().map(|tool| tool_definition(server, tool)));
                }
                Err(e) => {
                    tracing::warn!(server = %server.id, error = %e, "MCP tool discovery failed");
                    report.failures.push((server.id.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Invoke `tool_name` on `server_id` over a fresh connection.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let server = self.enabled_server(server_id)?;
        self.connections.call_tool(server, tool_name, arguments).await
    }
}

/// Advertised definition for a remote tool.
fn tool_definition(server: &McpServerConfig, tool: &McpToolInfo) -> ToolDefinition {
    let mut description = format!(
        "[{}] {}",
        server.display_name(),
        tool.description.as_deref().unwrap_or("").trim()
    );
    if let Some(warning) = server.capabilities_warning.as_deref().filter(|w| !w.is_empty()) {
        description.push_str(&format!(" (warning: {warning})"));
    }

    let parameters = if tool.input_schema.is_object() {
        tool.input_schema.clone()
    } else {
        serde_json::json!({ "type": "object", "properties": {} })
    };

    ToolDefinition::function(
        namespaced_tool_name(&server.id, &tool.name),
        description.trim_end().to_string(),
        parameters,
        server.requires_confirmation,
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::connection::tests::{http_server, manager, FakeServer};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn fake_server(tools: &[&str]) -> Arc<FakeServer> {
        Arc::new(FakeServer {
            tools: tools
                .iter()
                .map(|name| json!({"name": name, "description": "does things", "inputSchema": {"type": "object"}}))
                .collect(),
            ..FakeServer::default()
        })
    }

    #[test]
    fn test_namespaced_name() {
        assert_eq!(namespaced_tool_name("fs", "read"), "mcp.fs.read");
    }

    #[test]
    fn test_unknown_and_disabled_servers() {
        let server = fake_server(&[]);
        let mut off = http_server("off");
        off.enabled = false;
        let registry =
            McpRegistry::new(vec![http_server("on"), off], manager(&server, Duration::from_secs(1)))
                .unwrap();

        assert!(registry.enabled_server("on").is_ok());
        assert!(matches!(
            registry.enabled_server("off"),
            Err(McpError::ServerDisabled { .. })
        ));
        assert!(matches!(
            registry.enabled_server("nope"),
            Err(McpError::UnknownServer { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let server = fake_server(&[]);
        let result = McpRegistry::new(
            vec![http_server("a"), http_server("a")],
            manager(&server, Duration::from_secs(1)),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_discover_skips_disabled_and_namespaces() {
        let server = fake_server(&["read", "dir.list"]);
        let mut off = http_server("off");
        off.enabled = false;
        let mut fs = http_server("fs");
        fs.capabilities_warning = Some("can read any file".into());
        fs.requires_confirmation = true;

        let registry =
            McpRegistry::new(vec![fs, off], manager(&server, Duration::from_secs(5))).unwrap();
        let report = registry.discover_tools().await;

        assert!(report.failures.is_empty());
        let names: Vec<_> = report.tools.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["mcp.fs.read", "mcp.fs.dir.list"]);
        assert!(report.tools[0].function.description.contains("can read any file"));
        assert!(report.tools[0].function.requires_confirmation);
        // only one server was contacted
        assert_eq!(
            server.calls().iter().filter(|m| *m == "tools/list").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_discover_records_failures() {
        let server = Arc::new(FakeServer {
            fail_initialize: true,
            ..FakeServer::default()
        });
        let registry =
            McpRegistry::new(vec![http_server("bad")], manager(&server, Duration::from_secs(5)))
                .unwrap();

        let report = registry.discover_tools().await;
        assert!(report.tools.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "bad");
    }

    #[tokio::test]
    async fn test_call_disabled_server_never_connects() {
        let server = fake_server(&["read"]);
        let mut off = http_server("off");
        off.enabled = false;
        let registry = McpRegistry::new(vec![off], manager(&server, Duration::from_secs(5))).unwrap();

        let err = registry.call_tool("off", "read", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("'off'"));
        assert!(server.calls().is_empty());
    }
}
