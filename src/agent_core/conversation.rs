//! Tool-augmented conversation loop.
//!
//! Each round asks the model for one assistant turn. A turn without tool
//! calls ends the loop. Otherwise the calls run one at a time, in request
//! order, through the [`ToolRouter`], and every outcome (success or error)
//! is appended as a `tool` message before the model is asked again.
//!
//! Two circuit breakers stop a runaway model:
//! - more than `max_rounds` tool-invoking turns ends the loop with a warning
//! - calls beyond `max_tool_calls_per_message` in one turn are dropped with
//!   a warning
//!
//! Tools whose definition sets `requires_confirmation` are never run here;
//! the model gets a `REQUIRES_CONFIRMATION` error result instead.
//!
//! Only a failed completion request is fatal. It is returned to the caller
//! after the streaming placeholder has been discarded.

use serde_json::json;

use crate::config::ToolsConfig;
use crate::inference::config::ModelProfile;
use crate::inference::errors::InferenceError;
use crate::inference::metrics::Metrics;
use crate::inference::streaming::{AssistantTurn, OnUpdate};
use crate::inference::types::{ChatMessage, ToolCall, ToolDefinition};
use crate::inference::{ChatModel, CompletionInput};
use crate::tools::ToolContext;

use super::errors::AgentError;
use super::tool_router::ToolRouter;
use super::types::{Message, ToolOutcome};

/// Error code placed in the result of a gated tool call.
pub const REQUIRES_CONFIRMATION: &str = "REQUIRES_CONFIRMATION";

// ─── Observer ───────────────────────────────────────────────────────────────

/// Receives the loop's side effects as they happen. Every method defaults
/// to a no-op.
pub trait ConversationObserver: Send {
    /// A new assistant turn is about to stream.
    fn append_empty_assistant(&mut self) {}

    /// The streaming assistant turn changed.
    fn update_last_assistant(&mut self, _turn: &AssistantTurn) {}

    /// The streaming turn failed; drop the placeholder.
    fn discard_last_assistant(&mut self) {}

    /// A tool message was appended.
    fn append_message(&mut self, _message: &Message) {}

    /// A round-limit or call-cap warning was appended.
    fn append_warning(&mut self, _message: &Message) {}

    fn update_metrics(&mut self, _metrics: &Metrics) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ConversationObserver for NoopObserver {}

// ─── Options / Outcome ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConversationOptions {
    pub max_rounds: u32,
    pub max_tool_calls_per_message: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// When `false`, no definitions are sent to the model and any tool
    /// calls it emits anyway are not run.
    pub tools_enabled: bool,
    /// Per-conversation key for tools that need one.
    pub tool_api_key: Option<String>,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_tool_calls_per_message: 10,
            temperature: None,
            max_tokens: None,
            tools_enabled: true,
            tool_api_key: None,
        }
    }
}

impl ConversationOptions {
    /// Reject limits the loop cannot honour.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_tool_calls_per_message == 0 {
            return Err(AgentError::InvalidOptions {
                reason: "max_tool_calls_per_message must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn from_config(tools: &ToolsConfig, profile: &ModelProfile) -> Self {
        Self {
            max_rounds: tools.max_rounds,
            max_tool_calls_per_message: tools.max_tool_calls_per_message,
            temperature: Some(profile.temperature),
            max_tokens: Some(profile.max_tokens),
            tools_enabled: profile.tools_enabled,
            tool_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without calling tools.
    Completed,
    /// `max_rounds` was exceeded.
    RoundLimit,
    /// The model asked for tools while tools were disabled.
    ToolsDisabled,
}

#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    /// The full conversation, starting with the caller's messages.
    pub messages: Vec<Message>,
    /// Tool-invoking assistant turns seen.
    pub rounds: u32,
    pub stop_reason: StopReason,
    /// Metrics of the last completion.
    pub metrics: Metrics,
}

// ─── Loop ───────────────────────────────────────────────────────────────────

/// Drive the model/tool loop until the model stops calling tools or a
/// limit trips.
pub async fn run_tool_conversation(
    model: &dyn ChatModel,
    router: &ToolRouter,
    initial: Vec<Message>,
    tools: &[ToolDefinition],
    options: &ConversationOptions,
    observer: &mut dyn ConversationObserver,
) -> Result<ConversationOutcome, AgentError> {
    options.validate()?;
    let mut conversation = initial;
    let mut rounds: u32 = 0;
    let call_cap = options.max_tool_calls_per_message;
    let ctx = ToolContext {
        api_key: options.tool_api_key.clone(),
    };
    let advertised = (options.tools_enabled && !tools.is_empty()).then_some(tools);

    loop {
        let wire: Vec<ChatMessage> = conversation.iter().map(Message::to_chat_message).collect();
        let input = CompletionInput {
            messages: &wire,
            tools: advertised,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        observer.append_empty_assistant();
        let completion = {
            let mut on_update = |turn: &AssistantTurn, metrics: &Metrics| {
                observer.update_last_assistant(turn);
                observer.update_metrics(metrics);
            };
            model.complete(input, &mut on_update).await
        };
        let completion = match completion {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(model = %model.model_name(), error = %e, "completion failed");
                observer.discard_last_assistant();
                return Err(e.into());
            }
        };
        observer.update_metrics(&completion.metrics);
        let mut turn = completion.turn;

        // Terminal A: plain answer
        if turn.tool_calls.is_empty() {
            conversation.push(Message::from_turn(turn));
            return Ok(ConversationOutcome {
                messages: conversation,
                rounds,
                stop_reason: StopReason::Completed,
                metrics: completion.metrics,
            });
        }

        // Tools are off for this profile: keep the text, run nothing
        if !options.tools_enabled {
            tracing::warn!(
                model = %model.model_name(),
                requested = turn.tool_calls.len(),
                "tool calls ignored, tools are disabled"
            );
            turn.tool_calls.clear();
            observer.update_last_assistant(&turn);
            conversation.push(Message::from_turn(turn));

            let warning = Message::assistant(
                "The model requested tools, but tools are disabled for this model profile; \
                 no tools were run.",
            );
            observer.append_warning(&warning);
            conversation.push(warning);
            return Ok(ConversationOutcome {
                messages: conversation,
                rounds,
                stop_reason: StopReason::ToolsDisabled,
                metrics: completion.metrics,
            });
        }

        rounds += 1;

        // Terminal B: round limit, checked before anything in this turn runs
        if rounds > options.max_rounds {
            tracing::warn!(rounds, max_rounds = options.max_rounds, "tool round limit reached");
            turn.tool_calls.clear();
            observer.update_last_assistant(&turn);
            conversation.push(Message::from_turn(turn));

            let warning = Message::assistant(format!(
                "Stopped after {} rounds of tool calls. The model kept requesting tools; \
                 ask a narrower question or raise `max_rounds` to continue.",
                options.max_rounds
            ));
            observer.append_warning(&warning);
            conversation.push(warning);
            return Ok(ConversationOutcome {
                messages: conversation,
                rounds,
                stop_reason: StopReason::RoundLimit,
                metrics: completion.metrics,
            });
        }

        let requested = turn.tool_calls.len();
        if requested > call_cap {
            tracing::warn!(requested, cap = call_cap, "dropping tool calls beyond the cap");
            turn.tool_calls.truncate(call_cap);
            observer.update_last_assistant(&turn);
        }
        let calls = turn.tool_calls.clone();
        conversation.push(Message::from_turn(turn));

        for call in &calls {
            let outcome = run_call(router, call, tools, &ctx).await;
            let message = Message::tool_result(call, outcome);
            observer.append_message(&message);
            conversation.push(message);
        }

        if requested > call_cap {
            let warning = Message::assistant(format!(
                "The model requested {requested} tool calls in one turn; only the first \
                 {call_cap} were executed."
            ));
            observer.append_warning(&warning);
            conversation.push(warning);
        }
    }
}

/// Execute one call, or reject it when it needs confirmation.
async fn run_call(
    router: &ToolRouter,
    call: &ToolCall,
    tools: &[ToolDefinition],
    ctx: &ToolContext,
) -> ToolOutcome {
    let name = call.function.name.as_str();
    let args = call.parsed_arguments();

    let gated = router.requires_confirmation(name)
        || tools
            .iter()
            .find(|t| t.name() == name)
            .is_some_and(|t| t.function.requires_confirmation);
    if gated {
        tracing::info!(tool = %name, call_id = %call.id, "tool requires confirmation, not executed");
        let message = format!("{REQUIRES_CONFIRMATION}: '{name}' must be approved by the user before it runs");
        let result = json!({ "error": message, "code": REQUIRES_CONFIRMATION });
        return router.record_rejection(name, args, &message, result).await;
    }

    router.execute(name, args, ctx).await
}

/// Guidance text for a caller to show after a fatal completion error.
pub fn transport_failure_notice(error: &AgentError) -> String {
    match error {
        AgentError::Completion { source } if source.is_unreachable() => format!(
            "Could not reach the model endpoint ({source}). Check that the model server is \
             running and that your endpoint is configured correctly."
        ),
        AgentError::Completion {
            source: InferenceError::HttpError { status: 401 | 403, .. },
        } => "The model endpoint rejected the request. Check your API key.".to_string(),
        AgentError::Completion { source } => format!(
            "The model request failed: {source}. Check your endpoint and model settings."
        ),
        other => format!("The conversation stopped: {other}"),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
