//! Application configuration.
//!
//! One YAML file holds the model profiles, the tool loop limits, the MCP
//! server registry and the event log location. `${VAR}` and
//! `${VAR:-default}` are interpolated from the environment before parsing,
//! so secrets can stay out of the file.
//!
//! Lookup order:
//! 1. `LOCALCHAT_CONFIG` env var (explicit path)
//! 2. `localchat.yaml` in the working directory or any parent
//! 3. `<data_dir>/config.yaml`
//! 4. Built-in defaults (single local profile, no MCP servers)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::inference::config::{ModelProfile, ModelsConfig};
use crate::mcp_client::types::{validate_server_configs, McpServerConfig};

/// File name searched for in the working directory and its parents.
pub const CONFIG_FILE_NAME: &str = "localchat.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "LOCALCHAT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read {
        path: String,
        reason: String,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse {
        path: String,
        reason: String,
    },

    #[error("invalid config: {reason}")]
    Invalid {
        reason: String,
    },
}

// ─── Sections ────────────────────────────────────────────────────────────────

/// Tool loop limits and native tool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool-invoking assistant turns allowed per user message.
    pub max_rounds: u32,
    /// Calls executed from a single assistant turn; extras are dropped.
    pub max_tool_calls_per_message: usize,
    /// Sandbox root for `read_file`. Defaults to the working directory.
    pub project_root: Option<PathBuf>,
    /// Directory holding `<name>/SKILL.md`. Defaults to `<project_root>/skills`.
    pub skills_dir: Option<PathBuf>,
    pub brave_api_key: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_tool_calls_per_message: 10,
            project_root: None,
            skills_dir: None,
            brave_api_key: None,
        }
    }
}

impl ToolsConfig {
    pub fn project_root(&self) -> PathBuf {
        self.project_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.skills_dir
            .clone()
            .unwrap_or_else(|| self.project_root().join("skills"))
    }

    pub fn brave_api_key(&self) -> Option<&str> {
        self.brave_api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// MCP timeouts and the server registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub servers: Vec<McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            operation_timeout_secs: 30,
            servers: Vec::new(),
        }
    }
}

impl McpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

// ─── AppConfig ───────────────────────────────────────────────────────────────

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelProfile>,
    pub tools: ToolsConfig,
    pub mcp: McpConfig,
    /// JSONL audit log. Defaults to `<data_dir>/tool-calls.jsonl`.
    pub event_log: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let models = ModelsConfig::default();
        Self {
            active_model: models.active_model,
            models: models.models,
            tools: ToolsConfig::default(),
            mcp: McpConfig::default(),
            event_log: None,
        }
    }
}

impl AppConfig {
    /// Find and load the config file, or fall back to defaults.
    ///
    /// Returns the path that was loaded, if any.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match find_config_path(&cwd) {
            Some(path) => {
                let config = Self::load_from(&path)?;
                Ok((config, Some(path)))
            }
            None => {
                tracing::info!("no config file found, using defaults");
                Ok((Self::default(), None))
            }
        }
    }

    /// Load and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let base_dir = path.parent().unwrap_or(Path::new("."));
        let config = Self::from_yaml_str(&raw, base_dir).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;

        tracing::info!(
            path = %path.display(),
            active_model = %config.active_model,
            models = config.models.len(),
            mcp_servers = config.mcp.servers.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Parse YAML text. Relative paths resolve against `base_dir`.
    pub fn from_yaml_str(raw: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);

        let mut config: AppConfig =
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                path: "<inline>".into(),
                reason: e.to_string(),
            })?;

        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |p: &mut Option<PathBuf>| {
            if let Some(path) = p.as_mut() {
                let expanded = PathBuf::from(expand_tilde(&path.to_string_lossy()));
                *path = if expanded.is_absolute() {
                    expanded
                } else {
                    base_dir.join(expanded)
                };
            }
        };
        resolve(&mut self.tools.project_root);
        resolve(&mut self.tools.skills_dir);
        resolve(&mut self.event_log);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tools.max_tool_calls_per_message == 0 {
            return Err(ConfigError::Invalid {
                reason: "tools.max_tool_calls_per_message must be at least 1".into(),
            });
        }
        if self.mcp.connect_timeout_secs == 0 || self.mcp.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "mcp timeouts must be at least 1 second".into(),
            });
        }
        validate_server_configs(&self.mcp.servers).map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })
    }

    /// Model registry view used by the inference client.
    pub fn models_config(&self) -> ModelsConfig {
        ModelsConfig {
            active_model: self.active_model.clone(),
            models: self.models.clone(),
        }
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.event_log
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("tool-calls.jsonl"))
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file, searching upward from `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    // 1. Explicit env var
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(expand_tilde(&explicit)));
        }
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. Data directory
    let candidate = crate::data_dir().join("config.yaml");
    candidate.is_file().then_some(candidate)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();
        let expr: String = chars.by_ref().take_while(|&c| c != '}').collect();
        result.push_str(&resolve_var_expr(&expr));
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset and empty both take the default.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_with_default() {
        std::env::remove_var("__LOCALCHAT_TEST_UNSET__");
        assert_eq!(
            interpolate_env_vars("key: ${__LOCALCHAT_TEST_UNSET__:-fallback}"),
            "key: fallback"
        );
    }

    #[test]
    fn test_interpolate_with_value() {
        std::env::set_var("__LOCALCHAT_TEST_SET__", "sk-123");
        assert_eq!(
            interpolate_env_vars("${__LOCALCHAT_TEST_SET__:-fallback}/x"),
            "sk-123/x"
        );
        std::env::remove_var("__LOCALCHAT_TEST_SET__");
    }

    #[test]
    fn test_interpolate_unset_without_default_is_empty() {
        std::env::remove_var("__LOCALCHAT_TEST_EMPTY__");
        assert_eq!(interpolate_env_vars("a${__LOCALCHAT_TEST_EMPTY__}b"), "ab");
        assert_eq!(interpolate_env_vars("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/notes");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/notes"));
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_yaml_str("{}", Path::new("/tmp")).unwrap();
        assert_eq!(config.active_model, "local");
        assert_eq!(config.tools.max_rounds, 3);
        assert_eq!(config.tools.max_tool_calls_per_message, 10);
        assert_eq!(config.mcp.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.mcp.operation_timeout(), Duration::from_secs(30));
        assert!(config.models_config().resolve(None).is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
active_model: remote
models:
  remote:
    provider: openrouter
    model_name: meta-llama/llama-3.1-8b-instruct
    api_key: sk-or-test
tools:
  max_rounds: 5
  project_root: work
mcp:
  operation_timeout_secs: 5
  servers:
    - id: fs
      name: Filesystem
      transport: stdio
      command: mcp-fs
      args: ["--root", "."]
    - id: web
      name: Web
      transport: http
      url: http://127.0.0.1:8000/mcp
      enabled: false
event_log: logs/calls.jsonl
"#;
        let config = AppConfig::from_yaml_str(yaml, Path::new("/srv/app")).unwrap();
        assert_eq!(config.tools.max_rounds, 5);
        assert_eq!(config.tools.project_root(), PathBuf::from("/srv/app/work"));
        assert_eq!(config.tools.skills_dir(), PathBuf::from("/srv/app/work/skills"));
        assert_eq!(config.event_log_path(), PathBuf::from("/srv/app/logs/calls.jsonl"));
        assert_eq!(config.mcp.servers.len(), 2);
        assert!(!config.mcp.servers[1].enabled);

        let resolved = config.models_config().resolve(None).unwrap();
        assert_eq!(resolved.model_name, "meta-llama/llama-3.1-8b-instruct");
    }

    #[test]
    fn test_invalid_server_rejected() {
        let yaml = r#"
mcp:
  servers:
    - id: "bad id"
      name: Broken
      transport: stdio
      command: x
"#;
        let err = AppConfig::from_yaml_str(yaml, Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "got {err}");
    }

    #[test]
    fn test_zero_call_cap_rejected() {
        let yaml = "tools:\n  max_tool_calls_per_message: 0\n";
        assert!(AppConfig::from_yaml_str(yaml, Path::new("/")).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "tools:\n  max_rounds: 1\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.tools.max_rounds, 1);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "tools: [unclosed").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }
}
