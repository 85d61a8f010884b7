//! Model profile configuration.
//!
//! A profile names an OpenAI-compatible endpoint (local runtime or
//! OpenRouter), the model id to request, sampling defaults, and whether tool
//! definitions are sent at all.

use std::collections::HashMap;

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Where the endpoint lives. Drives default URL and extra headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Local runtime (llama.cpp, Ollama, LM Studio, vLLM).
    #[default]
    Local,
    /// OpenRouter's hosted API.
    #[serde(alias = "openrouter")]
    OpenRouter,
}

impl Provider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Local => "http://localhost:1234/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }
}

/// A single model's runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub provider: Provider,
    /// Falls back to the provider default when absent.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model id sent in the request body; the profile key when absent.
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// When `false`, no tool definitions are sent and the loop never dispatches.
    #[serde(default = "default_tools_enabled")]
    pub tools_enabled: bool,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_tools_enabled() -> bool {
    true
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            display_name: None,
            provider: Provider::Local,
            base_url: None,
            model_name: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tools_enabled: default_tools_enabled(),
        }
    }
}

impl ModelProfile {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Api key, treating empty strings (unset env interpolation) as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// The model registry: profiles keyed by name plus the active one.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    #[serde(default)]
    pub models: HashMap<String, ModelProfile>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert("local".to_string(), ModelProfile::default());
        Self {
            active_model: "local".to_string(),
            models,
        }
    }
}

/// A profile resolved for use: key, request model id, and settings.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub key: String,
    pub model_name: String,
    pub profile: ModelProfile,
}

impl ModelsConfig {
    /// Resolve `key` (or the active model when `None`).
    pub fn resolve(&self, key: Option<&str>) -> Result<ResolvedModel, InferenceError> {
        let key = key.unwrap_or(&self.active_model);
        let profile = self
            .models
            .get(key)
            .ok_or_else(|| InferenceError::ConfigError {
                reason: format!("model '{key}' not found in config"),
            })?
            .clone();

        let model_name = profile
            .model_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| key.to_string());

        if profile.provider == Provider::OpenRouter && profile.api_key().is_none() {
            return Err(InferenceError::ConfigError {
                reason: format!("model '{key}' uses OpenRouter but has no api_key"),
            });
        }

        Ok(ResolvedModel {
            key: key.to_string(),
            model_name,
            profile,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
