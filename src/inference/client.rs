//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to the configured endpoint (local runtime
//! or OpenRouter) and hands the response to the streaming parser.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::{Provider, ResolvedModel};
use super::errors::InferenceError;
use super::metrics::MetricsTracker;
use super::streaming::{read_completion, Completion, OnUpdate};
use super::types::{ChatCompletionRequest, ChatMessage, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for streaming calls.
///
/// Local models can take a long time to process a large context before the
/// first token, so this is far above the connect timeout.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Referer and title sent to OpenRouter for app attribution.
const OPENROUTER_REFERER: &str = "https://github.com/localchat/localchat";
const OPENROUTER_TITLE: &str = "LocalChat";

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// One completion request's inputs. `None` sampling fields use the profile.
#[derive(Debug, Clone, Copy)]
pub struct CompletionInput<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: Option<&'a [ToolDefinition]>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Anything that can produce one assistant turn from a conversation.
///
/// `on_update` is called as the turn is assembled, so callers can render
/// partial output and live metrics.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        input: CompletionInput<'_>,
        on_update: &mut OnUpdate<'_>,
    ) -> Result<Completion, InferenceError>;

    /// Model id, for logging.
    fn model_name(&self) -> &str;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client bound to one resolved model profile.
pub struct InferenceClient {
    http: HttpClient,
    model: ResolvedModel,
}

impl InferenceClient {
    /// Create a client for `model`. Does NOT check connectivity — that
    /// happens on the first request.
    pub fn new(model: ResolvedModel) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.profile.base_url().to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, model })
    }

    pub fn base_url(&self) -> &str {
        self.model.profile.base_url()
    }

    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    /// Attach auth and provider headers.
    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        if let Some(key) = self.model.profile.api_key() {
            builder = builder.bearer_auth(key);
        }
        if self.model.profile.provider == Provider::OpenRouter {
            builder = builder
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }
        builder
    }

    fn build_request(&self, input: &CompletionInput<'_>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.model_name.clone(),
            messages: input.messages.to_vec(),
            tools: input.tools.filter(|t| !t.is_empty()).map(<[_]>::to_vec),
            stream: true,
            temperature: input.temperature.unwrap_or(self.model.profile.temperature),
            max_tokens: input.max_tokens.unwrap_or(self.model.profile.max_tokens),
        }
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check if the endpoint is reachable. Does not consume inference tokens.
    pub async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = format!("{}/models", self.base_url());

        match self
            .authorize(self.http.get(&url))
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn complete(
        &self,
        input: CompletionInput<'_>,
        on_update: &mut OnUpdate<'_>,
    ) -> Result<Completion, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url());
        let body = self.build_request(&input);

        // Log the request metadata (not the full body — it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            "=== LLM REQUEST ==="
        );

        let tracker = MetricsTracker::start();

        let response = self
            .authorize(self.http.post(&url))
            .json(&body)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: STREAM_REQUEST_TIMEOUT.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let completion = read_completion(response, tracker, on_update).await?;

        tracing::info!(
            model = %self.model.model_name,
            content_len = completion.turn.content.len(),
            tool_calls = completion.turn.tool_calls.len(),
            ttft_ms = ?completion.metrics.ttft,
            total_latency_ms = ?completion.metrics.total_latency,
            "=== MODEL RESPONSE ==="
        );

        Ok(completion)
    }

    fn model_name(&self) -> &str {
        &self.model.model_name
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::config::{ModelProfile, ModelsConfig};
    use crate::inference::metrics::Metrics;
    use crate::inference::streaming::AssistantTurn;
    use crate::inference::types::Role;

    fn client_for(profile: ModelProfile) -> InferenceClient {
        let mut config = ModelsConfig::default();
        config.models.insert("test".into(), profile);
        InferenceClient::new(config.resolve(Some("test")).unwrap()).unwrap()
    }

    #[test]
    fn test_build_request_uses_profile_defaults() {
        let client = client_for(ModelProfile {
            model_name: Some("qwen".into()),
            temperature: 0.2,
            max_tokens: 512,
            ..ModelProfile::default()
        });
        let messages = vec![ChatMessage {
            role: Role::User,
            content: Some("hi".into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }];
        let req = client.build_request(&CompletionInput {
            messages: &messages,
            tools: Some(&[]),
            temperature: None,
            max_tokens: Some(64),
        });

        assert_eq!(req.model, "qwen");
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(req.max_tokens, 64);
        assert!(req.stream);
        // an empty tool list is omitted entirely
        assert!(req.tools.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let client = client_for(ModelProfile {
            base_url: Some("http://127.0.0.1:9/v1".into()),
            ..ModelProfile::default()
        });
        let mut on_update = |_: &AssistantTurn, _: &Metrics| {};
        let err = client
            .complete(
                CompletionInput {
                    messages: &[],
                    tools: None,
                    temperature: None,
                    max_tokens: None,
                },
                &mut on_update,
            )
            .await
            .unwrap_err();
        assert!(err.is_unreachable(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_health_check_unreachable_is_false() {
        let client = client_for(ModelProfile {
            base_url: Some("http://127.0.0.1:9/v1".into()),
            ..ModelProfile::default()
        });
        assert!(!client.health_check().await.unwrap());
    }
}
