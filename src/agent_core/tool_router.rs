//! ToolRouter — dispatches model tool calls to native handlers or MCP servers.
//!
//! The ToolRouter is the bridge between the model's tool call decisions and
//! the two execution backends. It handles:
//! - Name resolution (`mcp.<server_id>.<tool>` vs. a native tool name)
//! - Execution via the native registry or a fresh MCP connection
//! - Audit logging of every dispatch (start → finalize → persist)
//! - Replay of a persisted event
//!
//! `execute` never fails: every error ends up in the event and in an
//! `{"error": …}` result the model can read.

use std::sync::Arc;

use serde_json::json;

use crate::inference::types::ToolDefinition;
use crate::mcp_client::registry::MCP_TOOL_PREFIX;
use crate::mcp_client::McpRegistry;
use crate::tools::{NativeToolRegistry, ToolContext};

use super::errors::{AgentError, DispatchError};
use super::event_log::EventLogger;
use super::sanitize::sanitize_serializable;
use super::types::{EventFilter, EventMeta, EventSource, ToolExecutionEvent, ToolOutcome};

// ─── Name resolution ────────────────────────────────────────────────────────

/// Backend a tool name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTarget {
    Native { name: String },
    /// `tool_name` may itself contain dots.
    Mcp { server_id: String, tool_name: String },
}

impl ToolTarget {
    /// Resolve a model-facing tool name.
    ///
    /// Anything starting with `mcp.` must have at least three non-empty
    /// dot-separated segments.
    pub fn parse(name: &str) -> Result<Self, DispatchError> {
        if !is_mcp_shaped(name) {
            return Ok(ToolTarget::Native {
                name: name.to_string(),
            });
        }

        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(DispatchError::InvalidToolName {
                name: name.to_string(),
            });
        }

        Ok(ToolTarget::Mcp {
            server_id: segments[1].to_string(),
            tool_name: segments[2..].join("."),
        })
    }
}

fn is_mcp_shaped(name: &str) -> bool {
    name.strip_prefix(MCP_TOOL_PREFIX)
        .is_some_and(|rest| rest.starts_with('.'))
}

// ─── ToolRouter ─────────────────────────────────────────────────────────────

pub struct ToolRouter {
    native: NativeToolRegistry,
    mcp: McpRegistry,
    events: Arc<EventLogger>,
}

impl ToolRouter {
    pub fn new(native: NativeToolRegistry, mcp: McpRegistry, events: Arc<EventLogger>) -> Self {
        Self {
            native,
            mcp,
            events,
        }
    }

    pub fn event_log(&self) -> &EventLogger {
        &self.events
    }

    pub fn mcp(&self) -> &McpRegistry {
        &self.mcp
    }

    /// Native definitions plus everything the enabled MCP servers advertise.
    /// Servers that fail discovery are left out.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = self.native.definitions();
        definitions.extend(self.mcp.discover_tools().await.tools);
        definitions
    }

    /// Whether a call to `tool_name` needs user approval, independent of
    /// which definitions were advertised. Malformed names are not gated;
    /// they fail at dispatch.
    pub fn requires_confirmation(&self, tool_name: &str) -> bool {
        match ToolTarget::parse(tool_name) {
            Ok(ToolTarget::Native { name }) => self
                .native
                .get(&name)
                .is_some_and(|tool| tool.definition().function.requires_confirmation),
            Ok(ToolTarget::Mcp { server_id, .. }) => self
                .mcp
                .server(&server_id)
                .is_ok_and(|server| server.requires_confirmation),
            Err(_) => false,
        }
    }

    /// Audit metadata for a call to `tool_name`, resolved without dispatching.
    pub fn event_meta(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        replay_of: Option<String>,
    ) -> EventMeta {
        let mut meta = EventMeta::native(tool_name, args);
        meta.replay_of = replay_of;

        if is_mcp_shaped(tool_name) {
            meta.source = EventSource::Mcp;
        }
        if let Ok(ToolTarget::Mcp {
            server_id,
            tool_name,
        }) = ToolTarget::parse(tool_name)
        {
            meta.server_name = self
                .mcp
                .server(&server_id)
                .ok()
                .map(|s| s.display_name().to_string());
            meta.server_id = Some(server_id);
            meta.mcp_tool_name = Some(tool_name);
        }
        meta
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Run one tool call with full audit: start → dispatch → finalize → persist.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutcome {
        self.execute_inner(tool_name, args, ctx, None).await
    }

    /// Re-run a persisted event's tool and arguments as a new event.
    pub async fn replay(&self, event_id: &str, ctx: &ToolContext) -> Result<ToolOutcome, AgentError> {
        let original = self
            .events
            .get_event_by_id(event_id)
            .await?
            .ok_or_else(|| AgentError::EventNotFound {
                event_id: event_id.to_string(),
            })?;

        tracing::info!(event_id, tool = %original.tool_name, "replaying tool call");
        Ok(self
            .execute_inner(
                &original.tool_name,
                original.args,
                ctx,
                Some(original.id),
            )
            .await)
    }

    pub async fn list_events(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<ToolExecutionEvent>, AgentError> {
        self.events.list_events(filter).await
    }

    pub async fn get_event_by_id(
        &self,
        id: &str,
    ) -> Result<Option<ToolExecutionEvent>, AgentError> {
        self.events.get_event_by_id(id).await
    }

    /// Log an error event for a call that was never dispatched.
    pub async fn record_rejection(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        message: &str,
        result: serde_json::Value,
    ) -> ToolOutcome {
        let event = self.events.start_event(self.event_meta(tool_name, args, None));
        let event = self.events.finalize_error(event, message, Some(&result));
        self.persist(&event).await;
        ToolOutcome { event, result }
    }

    async fn execute_inner(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
        replay_of: Option<String>,
    ) -> ToolOutcome {
        let event = self
            .events
            .start_event(self.event_meta(tool_name, args.clone(), replay_of));
        tracing::info!(
            tool = %tool_name,
            sequence = event.sequence,
            event_id = %event.id,
            "dispatching tool call"
        );

        let (event, result) = match self.dispatch(tool_name, &args, ctx).await {
            Ok(value) => {
                let event = self.events.finalize_success(event, &value);
                (event, value)
            }
            Err(e) => {
                let message = e.to_string();
                let partial = match &e {
                    DispatchError::ToolReported { result, .. } => Some(result),
                    _ => None,
                };
                let event = self.events.finalize_error(event, &message, partial);
                (event, json!({ "error": message }))
            }
        };

        tracing::debug!(
            tool = %tool_name,
            status = event.status.as_str(),
            duration_ms = event.duration_ms.unwrap_or(0),
            "tool call finished"
        );
        self.persist(&event).await;
        ToolOutcome { event, result }
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, DispatchError> {
        match ToolTarget::parse(tool_name)? {
            ToolTarget::Native { name } => {
                let tool = self
                    .native
                    .get(&name)
                    .ok_or(DispatchError::UnknownTool { name })?;
                Ok(tool.execute(args, ctx).await?)
            }
            ToolTarget::Mcp {
                server_id,
                tool_name,
            } => {
                let result = self
                    .mcp
                    .call_tool(&server_id, &tool_name, args.clone())
                    .await?;
                let value = sanitize_serializable(&result);
                if result.is_error {
                    let text = result.text();
                    let message = if text.trim().is_empty() {
                        format!("MCP tool '{tool_name}' on '{server_id}' reported an error")
                    } else {
                        text
                    };
                    return Err(DispatchError::ToolReported {
                        message,
                        result: value,
                    });
                }
                Ok(value)
            }
        }
    }

    /// Audit persistence never fails the tool call.
    async fn persist(&self, event: &ToolExecutionEvent) {
        if let Err(e) = self.events.persist(event).await {
            tracing::warn!(event_id = %event.id, error = %e, "failed to persist tool event");
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent_core::types::EventStatus;
    use crate::mcp_client::connection::tests::{http_server, manager, FakeServer};
    use crate::mcp_client::{ConnectionManager, McpServerConfig};
    use crate::tools::{NativeTool, ToolError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Native tool that echoes its arguments and counts calls.
    #[derive(Default)]
    pub(crate) struct EchoTool {
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NativeTool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("echo", "Echo arguments", json!({"type": "object"}), false)
        }

        async fn execute(
            &self,
            args: &serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if args.get("fail").is_some() {
                return Err(ToolError::invalid("echo", "asked to fail"));
            }
            Ok(json!({ "echo": args, "key": ctx.api_key }))
        }
    }

    /// Router over an `echo` tool, the given MCP servers, and a temp log.
    pub(crate) fn router_with(
        servers: Vec<McpServerConfig>,
        connections: ConnectionManager,
    ) -> (tempfile::TempDir, ToolRouter, Arc<AtomicUsize>) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventLogger::open(dir.path().join("tool-calls.jsonl")).unwrap());
        let echo = EchoTool::default();
        let calls = Arc::clone(&echo.calls);
        let mut native = NativeToolRegistry::new();
        native.register(echo);
        let mcp = McpRegistry::new(servers, connections).unwrap();
        (dir, ToolRouter::new(native, mcp, events), calls)
    }

    pub(crate) fn router() -> (tempfile::TempDir, ToolRouter, Arc<AtomicUsize>) {
        router_with(Vec::new(), ConnectionManager::default())
    }

    #[test]
    fn test_parse_tool_names() {
        assert_eq!(
            ToolTarget::parse("mcp.fs.read").unwrap(),
            ToolTarget::Mcp {
                server_id: "fs".into(),
                tool_name: "read".into()
            }
        );
        assert_eq!(
            ToolTarget::parse("mcp.fs.a.b").unwrap(),
            ToolTarget::Mcp {
                server_id: "fs".into(),
                tool_name: "a.b".into()
            }
        );
        assert_eq!(
            ToolTarget::parse("read_file").unwrap(),
            ToolTarget::Native {
                name: "read_file".into()
            }
        );
        assert_eq!(
            ToolTarget::parse("mcpish").unwrap(),
            ToolTarget::Native {
                name: "mcpish".into()
            }
        );
        for bad in ["mcp.fs", "mcp.", "mcp..read", "mcp.fs.", "mcp.fs..x"] {
            assert!(
                matches!(ToolTarget::parse(bad), Err(DispatchError::InvalidToolName { .. })),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_native_success_is_logged() {
        let (_dir, router, calls) = router();
        let ctx = ToolContext {
            api_key: Some("k".into()),
        };
        let outcome = router.execute("echo", json!({"x": 1}), &ctx).await;

        assert!(!outcome.is_error());
        assert_eq!(outcome.result["echo"]["x"], 1);
        assert_eq!(outcome.result["key"], "k");
        assert_eq!(outcome.event.sequence, 1);
        assert_eq!(outcome.event.source, EventSource::Native);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let persisted = router.get_event_by_id(&outcome.event.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, EventStatus::Success);
    }

    #[tokio::test]
    async fn test_failures_become_error_results() {
        let (_dir, router, _) = router();
        let ctx = ToolContext::default();

        let unknown = router.execute("write_file", json!({}), &ctx).await;
        assert!(unknown.is_error());
        assert_eq!(unknown.result, json!({"error": "unknown tool 'write_file'"}));

        let failed = router.execute("echo", json!({"fail": true}), &ctx).await;
        assert!(failed.is_error());
        assert!(failed.result["error"].as_str().unwrap().contains("asked to fail"));

        let events = router.list_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.status == EventStatus::Error));
    }

    #[tokio::test]
    async fn test_malformed_mcp_name_never_connects() {
        let server = Arc::new(FakeServer::default());
        let (_dir, router, _) =
            router_with(vec![http_server("fs")], manager(&server, Duration::from_secs(5)));

        let outcome = router.execute("mcp.fs", json!({}), &ToolContext::default()).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.event.source, EventSource::Mcp);
        assert!(outcome.event.error_message.as_deref().unwrap().contains("mcp.<server_id>"));
        assert_eq!(server.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mcp_dispatch() {
        let server = Arc::new(FakeServer::default());
        let (_dir, router, _) =
            router_with(vec![http_server("fs")], manager(&server, Duration::from_secs(5)));

        let outcome = router
            .execute("mcp.fs.dir.list", json!({"path": "/"}), &ToolContext::default())
            .await;
        assert!(!outcome.is_error(), "{:?}", outcome.result);
        assert_eq!(outcome.result["content"][0]["text"], "called dir.list");
        assert_eq!(outcome.result["structuredContent"]["path"], "/");
        assert_eq!(outcome.event.server_id.as_deref(), Some("fs"));
        assert_eq!(outcome.event.server_name.as_deref(), Some("fs server"));
        assert_eq!(outcome.event.mcp_tool_name.as_deref(), Some("dir.list"));
        assert!(server.calls().contains(&"close".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_servers() {
        let server = Arc::new(FakeServer::default());
        let mut off = http_server("off");
        off.enabled = false;
        let (_dir, router, _) = router_with(vec![off], manager(&server, Duration::from_secs(5)));
        let ctx = ToolContext::default();

        let disabled = router.execute("mcp.off.read", json!({}), &ctx).await;
        assert_eq!(
            disabled.result,
            json!({"error": "MCP server 'off' is disabled"})
        );

        let unknown = router.execute("mcp.nope.read", json!({}), &ctx).await;
        assert!(unknown.is_error());
        assert!(unknown.event.server_name.is_none());
        assert_eq!(server.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replay_links_to_original() {
        let (_dir, router, calls) = router();
        let ctx = ToolContext::default();
        let original = router.execute("echo", json!({"x": 2}), &ctx).await;

        let replayed = router.replay(&original.event.id, &ctx).await.unwrap();
        assert_eq!(replayed.event.replay_of.as_deref(), Some(original.event.id.as_str()));
        assert_eq!(replayed.event.args, json!({"x": 2}));
        assert_eq!(replayed.event.sequence, original.event.sequence + 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // the original line is untouched
        let stored = router.get_event_by_id(&original.event.id).await.unwrap().unwrap();
        assert_eq!(stored, original.event);

        let missing = router.replay("nope", &ctx).await;
        assert!(matches!(missing, Err(AgentError::EventNotFound { .. })));
    }

    #[tokio::test]
    async fn test_record_rejection_does_not_dispatch() {
        let (_dir, router, calls) = router();
        let outcome = router
            .record_rejection("echo", json!({}), "needs approval", json!({"error": "needs approval"}))
            .await;
        assert!(outcome.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.list_events(&EventFilter::default()).await.unwrap().len(), 1);
    }

    #[test]
    fn test_requires_confirmation_from_server_config() {
        let server = Arc::new(FakeServer::default());
        let mut gated = http_server("gated");
        gated.requires_confirmation = true;
        let (_dir, router, _) = router_with(
            vec![gated, http_server("fs")],
            manager(&server, Duration::from_secs(5)),
        );

        assert!(router.requires_confirmation("mcp.gated.write"));
        assert!(!router.requires_confirmation("mcp.fs.read"));
        assert!(!router.requires_confirmation("mcp.nope.read"));
        assert!(!router.requires_confirmation("mcp.gated"));
        assert!(!router.requires_confirmation("echo"));
        assert!(!router.requires_confirmation("write_file"));
    }

    #[tokio::test]
    async fn test_tool_definitions_include_discovered() {
        let server = Arc::new(FakeServer {
            tools: vec![json!({"name": "read", "inputSchema": {"type": "object"}})],
            ..FakeServer::default()
        });
        let (_dir, router, _) =
            router_with(vec![http_server("fs")], manager(&server, Duration::from_secs(5)));
        let names: Vec<String> = router
            .tool_definitions()
            .await
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["echo", "mcp.fs.read"]);
    }
}
