//! Inference Client — OpenAI-compatible API client.
//!
//! This module handles all communication with the model endpoint:
//! - Streaming chat completions (with a non-streaming fallback)
//! - Incremental tool call reconstruction from SSE frames
//! - Generation metrics (TTFT, tokens/sec, latency)
//! - Model profile configuration (local runtime or OpenRouter)
//!
//! Switching models is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{ChatModel, CompletionInput, InferenceClient};
pub use config::{ModelProfile, ModelsConfig, Provider, ResolvedModel};
pub use errors::InferenceError;
pub use metrics::{Metrics, MetricsTracker};
pub use streaming::{AssistantTurn, Completion, OnUpdate};
pub use types::{ChatMessage, Role, ToolCall, ToolDefinition};
