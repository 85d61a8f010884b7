//! Shared types for the agent core.
//!
//! Conversation messages, the tool execution audit record, and the filters
//! used to query the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::streaming::AssistantTurn;
use crate::inference::types::{ChatMessage, Role, ToolCall};

// ─── Conversation Messages ──────────────────────────────────────────────────

/// One turn in a conversation, as the caller sees it.
///
/// Unlike [`ChatMessage`], a tool message also carries the audit record of
/// the execution that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content. Empty while an assistant turn is still streaming.
    #[serde(default)]
    pub content: String,
    /// Tool identity (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Links a tool message to the assistant call that spawned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_event: Option<ToolExecutionEvent>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            tool_event: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Assistant-role text with no tool calls. Also used for loop warnings.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn from_turn(turn: AssistantTurn) -> Self {
        Self {
            tool_calls: (!turn.tool_calls.is_empty()).then_some(turn.tool_calls),
            ..Self::plain(Role::Assistant, turn.content)
        }
    }

    /// The `tool` message answering `call`.
    pub fn tool_result(call: &ToolCall, outcome: ToolOutcome) -> Self {
        let content = serde_json::to_string(&outcome.result).unwrap_or_else(|_| "{}".to_string());
        Self {
            name: Some(call.function.name.clone()),
            tool_call_id: Some(call.id.clone()),
            tool_event: Some(outcome.event),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Wire form sent to the model. The audit record stays local.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: Some(self.content.clone()),
            name: self.name.clone(),
            tool_call_id: self.tool_call_id.clone(),
            tool_calls: self.tool_calls.clone(),
        }
    }
}

// ─── Tool Execution Events ──────────────────────────────────────────────────

/// Which backend executed a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Native,
    Mcp,
}

/// Lifecycle status of an execution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Success,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Running => "running",
            EventStatus::Success => "success",
            EventStatus::Error => "error",
        }
    }

    /// Case-insensitive parse; unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Some(EventStatus::Running),
            "success" => Some(EventStatus::Success),
            "error" => Some(EventStatus::Error),
            _ => None,
        }
    }
}

/// Audit record for one tool execution.
///
/// Created `running` at dispatch, moved once into `success` or `error`,
/// then appended to the log and never changed again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionEvent {
    pub id: String,
    pub sequence: u64,
    pub source: EventSource,
    /// Name as the model called it (`mcp.<server>.<tool>` for MCP).
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Id of the event this one re-executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_of: Option<String>,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub args_preview: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub status: EventStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Input to `EventLogger::start_event`.
#[derive(Debug, Clone)]
pub struct EventMeta {
    pub source: EventSource,
    pub tool_name: String,
    pub mcp_tool_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub replay_of: Option<String>,
    pub args: serde_json::Value,
}

impl EventMeta {
    pub fn native(tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            source: EventSource::Native,
            tool_name: tool_name.into(),
            mcp_tool_name: None,
            server_id: None,
            server_name: None,
            replay_of: None,
            args,
        }
    }
}

/// Result of routing one tool call: the terminal event and the JSON handed
/// back to the model.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub event: ToolExecutionEvent,
    pub result: serde_json::Value,
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        self.event.status == EventStatus::Error
    }
}

// ─── Event Queries ──────────────────────────────────────────────────────────

/// Default number of events returned by a listing.
pub const DEFAULT_EVENT_LIMIT: usize = 100;

/// Filters for `EventLogger::list_events`. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Case-insensitive substring of the tool name or remote tool name.
    pub tool_name: Option<String>,
    /// Exact status, case-insensitive.
    pub status: Option<String>,
    /// Substring of the server id.
    pub server_id: Option<String>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_EVENT_LIMIT)
    }

    pub fn matches(&self, event: &ToolExecutionEvent) -> bool {
        if let Some(needle) = non_empty(&self.tool_name) {
            let needle = needle.to_lowercase();
            let by_name = event.tool_name.to_lowercase().contains(&needle);
            let by_remote = event
                .mcp_tool_name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&needle));
            if !by_name && !by_remote {
                return false;
            }
        }
        if let Some(status) = non_empty(&self.status) {
            if !event.status.as_str().eq_ignore_ascii_case(status.trim()) {
                return false;
            }
        }
        if let Some(server) = non_empty(&self.server_id) {
            if !event.server_id.as_deref().is_some_and(|id| id.contains(server)) {
                return false;
            }
        }
        true
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(tool: &str, status: EventStatus, server: Option<&str>) -> ToolExecutionEvent {
        ToolExecutionEvent {
            id: "e1".into(),
            sequence: 1,
            source: if server.is_some() { EventSource::Mcp } else { EventSource::Native },
            tool_name: tool.into(),
            mcp_tool_name: server.map(|_| tool.rsplit('.').next().unwrap_or(tool).to_string()),
            server_id: server.map(str::to_string),
            server_name: None,
            replay_of: None,
            args: json!({}),
            args_preview: json!({}),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status,
            error_message: None,
            result: None,
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(EventStatus::parse("SUCCESS"), Some(EventStatus::Success));
        assert_eq!(EventStatus::parse(" error "), Some(EventStatus::Error));
        assert_eq!(EventStatus::parse("done"), None);
        let json = serde_json::to_string(&EventStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);
    }

    #[test]
    fn test_filter_matching() {
        let native = event("read_file", EventStatus::Success, None);
        let remote = event("mcp.github-main.search_issues", EventStatus::Error, Some("github-main"));

        let by_name = EventFilter {
            tool_name: Some("READ".into()),
            ..EventFilter::default()
        };
        assert!(by_name.matches(&native));
        assert!(!by_name.matches(&remote));

        let by_remote_name = EventFilter {
            tool_name: Some("issues".into()),
            ..EventFilter::default()
        };
        assert!(by_remote_name.matches(&remote));

        let by_status = EventFilter {
            status: Some("Error".into()),
            ..EventFilter::default()
        };
        assert!(!by_status.matches(&native));
        assert!(by_status.matches(&remote));

        let by_server = EventFilter {
            server_id: Some("github".into()),
            ..EventFilter::default()
        };
        assert!(by_server.matches(&remote));
        assert!(!by_server.matches(&native));

        assert!(EventFilter::default().matches(&native));
        assert_eq!(EventFilter::default().limit(), DEFAULT_EVENT_LIMIT);
    }

    #[test]
    fn test_event_ignores_unknown_fields() {
        let mut value = serde_json::to_value(event("read_file", EventStatus::Success, None)).unwrap();
        value["added_later"] = json!("ignored");
        let parsed: ToolExecutionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.tool_name, "read_file");
    }

    #[test]
    fn test_message_wire_form() {
        let call = ToolCall::new("c1", "read_file", r#"{"filePath":"x"}"#);
        let turn = AssistantTurn {
            content: String::new(),
            tool_calls: vec![call.clone()],
        };
        let assistant = Message::from_turn(turn);
        assert_eq!(assistant.tool_calls.as_ref().map(Vec::len), Some(1));

        let outcome = ToolOutcome {
            event: event("read_file", EventStatus::Success, None),
            result: json!({"content": "hi"}),
        };
        let tool = Message::tool_result(&call, outcome);
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool.content, r#"{"content":"hi"}"#);

        let wire = serde_json::to_value(tool.to_chat_message()).unwrap();
        assert_eq!(wire["role"], "tool");
        assert!(wire.get("tool_event").is_none());

        let plain = Message::from_turn(AssistantTurn::default());
        assert!(plain.tool_calls.is_none());
    }
}
