//! Agent Core — the tool-augmented generation loop and its audit trail.
//!
//! Submodules:
//! - `conversation`: Model/tool round loop with round and call-count limits
//! - `tool_router`: Dispatches tool calls to native handlers or MCP servers
//! - `event_log`: Append-only JSONL record of every tool execution
//! - `sanitize`: Secret redaction and size limits for logged payloads
//! - `types`: Messages, execution events, event filters
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod event_log;
pub mod sanitize;
pub mod tool_router;
pub mod types;

// Re-exports for convenience
pub use conversation::{
    run_tool_conversation, transport_failure_notice, ConversationObserver, ConversationOptions,
    ConversationOutcome, NoopObserver, StopReason,
};
pub use errors::{AgentError, DispatchError};
pub use event_log::EventLogger;
pub use tool_router::{ToolRouter, ToolTarget};
pub use types::{
    EventFilter, EventMeta, EventSource, EventStatus, Message, ToolExecutionEvent, ToolOutcome,
};
