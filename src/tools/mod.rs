//! Native tools — in-process handlers the model can call by exact name.
//!
//! Each handler validates its own arguments and returns a JSON result.
//! The registry is fixed at startup: `read_file`, `brave_search`, `load_skill`.

pub mod brave_search;
pub mod load_skill;
pub mod read_file;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ToolsConfig;
use crate::inference::types::ToolDefinition;

pub use brave_search::BraveSearchTool;
pub use load_skill::LoadSkillTool;
pub use read_file::ReadFileTool;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    /// Missing or malformed argument.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// A path resolved outside the sandbox root.
    #[error("path '{path}' is outside the project root")]
    OutsideRoot {
        path: String,
    },

    #[error("{path}: {reason}")]
    Io {
        path: String,
        reason: String,
    },

    #[error("'{tool}' requires an API key")]
    MissingApiKey {
        tool: String,
    },

    /// The remote service failed or answered with an error status.
    #[error("'{tool}' request failed: {reason}")]
    Upstream {
        tool: String,
        reason: String,
    },
}

impl ToolError {
    pub(crate) fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read a required, non-empty string argument.
pub(crate) fn required_str<'a>(
    tool: &str,
    args: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ToolError> {
    match args.get(field) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(serde_json::Value::String(_)) => {
            Err(ToolError::invalid(tool, format!("'{field}' must not be empty")))
        }
        Some(_) => Err(ToolError::invalid(tool, format!("'{field}' must be a string"))),
        None => Err(ToolError::invalid(tool, format!("missing required field '{field}'"))),
    }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Per-conversation inputs to native tools.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Search API key supplied with the conversation; overrides the configured one.
    pub api_key: Option<String>,
}

#[async_trait]
pub trait NativeTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Schema advertised to the model.
    fn definition(&self) -> ToolDefinition;

    async fn execute(
        &self,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Native tools keyed by exact name.
#[derive(Clone, Default)]
pub struct NativeToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn NativeTool>>,
}

impl NativeToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard three tools, configured from `tools`.
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(ReadFileTool::new(config.project_root()));
        registry.register(BraveSearchTool::new(
            config.brave_api_key().map(str::to_string),
        ));
        registry.register(LoadSkillTool::new(config.skills_dir()));
        registry
    }

    pub fn register<T: NativeTool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}
