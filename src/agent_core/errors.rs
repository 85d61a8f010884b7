//! Agent Core error types.

use thiserror::Error;

use crate::inference::errors::InferenceError;
use crate::mcp_client::errors::McpError;
use crate::tools::ToolError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model completion request failed. Fatal for the current turn.
    #[error("completion failed: {source}")]
    Completion { source: InferenceError },

    /// Reading or appending the event log failed.
    #[error("event log error ({path}): {reason}")]
    EventLog { path: String, reason: String },

    /// No persisted event with this id.
    #[error("event not found: '{event_id}'")]
    EventNotFound { event_id: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Conversation options that cannot be run.
    #[error("invalid conversation options: {reason}")]
    InvalidOptions { reason: String },
}

impl From<InferenceError> for AgentError {
    fn from(source: InferenceError) -> Self {
        AgentError::Completion { source }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

/// Why a single tool dispatch failed. Always folded into an `error` event
/// and an `{"error": …}` tool result, never returned past the router.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid MCP tool name '{name}': expected mcp.<server_id>.<tool_name>")]
    InvalidToolName { name: String },

    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error(transparent)]
    Native(#[from] ToolError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    /// The remote tool ran but flagged its own result as an error.
    #[error("{message}")]
    ToolReported {
        message: String,
        result: serde_json::Value,
    },
}
