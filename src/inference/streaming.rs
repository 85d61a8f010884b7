//! Streaming completion parser for OpenAI-compatible chat completions.
//!
//! Consumes newline-delimited `data: {json}` frames (terminated by
//! `data: [DONE]`), rebuilds the assistant text and tool calls incrementally,
//! and keeps the generation metrics current. Endpoints that answer with a
//! single JSON body instead of a stream go through the same entry point.

use std::time::Instant;

use futures::stream::{Stream, StreamExt};
use uuid::Uuid;

use super::errors::InferenceError;
use super::metrics::{Metrics, MetricsTracker};
use super::types::{ChatCompletionChunk, ChatCompletionResponse, ChunkToolCall, ToolCall};

// ─── Output ──────────────────────────────────────────────────────────────────

/// The assistant side of one model turn, as reconstructed so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    /// Ordered by the wire `index` of each call.
    pub tool_calls: Vec<ToolCall>,
}

/// A finished completion: the final turn plus the closed-out metrics.
#[derive(Debug, Clone)]
pub struct Completion {
    pub turn: AssistantTurn,
    pub metrics: Metrics,
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

/// Wire position of each entry in `AssistantTurn::tool_calls`.
#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    /// `false` when the id was synthesized because the server omitted it.
    server_id: bool,
}

/// Incremental state for one streamed completion.
///
/// Bytes are buffered until a newline so that a frame (or a multi-byte UTF-8
/// character) split across network chunks is only parsed once complete.
#[derive(Debug)]
pub struct CompletionAccumulator {
    pending: Vec<u8>,
    turn: AssistantTurn,
    slots: Vec<Slot>,
    tracker: MetricsTracker,
    reported_tokens: Option<u64>,
    done: bool,
}

impl CompletionAccumulator {
    pub fn new(tracker: MetricsTracker) -> Self {
        Self {
            pending: Vec::new(),
            turn: AssistantTurn::default(),
            slots: Vec::new(),
            tracker,
            reported_tokens: None,
            done: false,
        }
    }

    pub fn turn(&self) -> &AssistantTurn {
        &self.turn
    }

    pub fn metrics(&self) -> Metrics {
        self.tracker.metrics()
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes. Returns `true` if content or tool-call state changed.
    ///
    /// The trailing partial line is held back for the next call.
    pub fn push_bytes(&mut self, bytes: &[u8], now: Instant) -> Result<bool, InferenceError> {
        self.pending.extend_from_slice(bytes);

        let mut changed = false;
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            changed |= self.process_line(&line, now)?;
        }
        Ok(changed)
    }

    /// Process whatever is left in the buffer and close out the metrics.
    pub fn finish(mut self, now: Instant) -> Result<Completion, InferenceError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.process_line(&line, now)?;
        }
        let metrics = self.tracker.finish(now, self.reported_tokens);
        Ok(Completion {
            turn: self.turn,
            metrics,
        })
    }

    /// Handle one complete line. Non-`data:` lines (comments, `event:`,
    /// blank separators) are ignored.
    fn process_line(&mut self, line: &str, now: Instant) -> Result<bool, InferenceError> {
        let line = line.trim_end_matches('\r');
        let Some(data) = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))
        else {
            return Ok(false);
        };
        let data = data.trim();

        if self.done || data.is_empty() {
            return Ok(false);
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(false);
        }

        let frame: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    frame = %truncate_for_log(data),
                    "skipping malformed stream frame"
                );
                return Ok(false);
            }
        };

        if let Some(error) = frame.get("error") {
            return Err(upstream_error(error));
        }

        let chunk: ChatCompletionChunk = match serde_json::from_value(frame) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "skipping stream frame with unexpected shape");
                return Ok(false);
            }
        };

        Ok(self.apply_chunk(chunk, now))
    }

    fn apply_chunk(&mut self, chunk: ChatCompletionChunk, now: Instant) -> bool {
        if let Some(tokens) = chunk.usage.and_then(|u| u.completion_tokens) {
            self.reported_tokens = Some(tokens);
        }

        let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) else {
            return false;
        };

        let mut changed = false;

        if let Some(content) = delta.content {
            if !content.is_empty() {
                self.turn.content.push_str(&content);
                self.tracker.record_content(now);
                changed = true;
            }
        }

        if let Some(fragments) = delta.tool_calls {
            for fragment in fragments {
                self.apply_tool_fragment(fragment);
                changed = true;
            }
        }

        changed
    }

    /// Merge one tool-call fragment. The first fragment for an index allocates
    /// the call; later ones append to the argument string. Indices may arrive
    /// out of order or with gaps.
    fn apply_tool_fragment(&mut self, fragment: ChunkToolCall) {
        let index = fragment.index.unwrap_or(0);
        let (name, arguments) = match fragment.function {
            Some(f) => (f.name, f.arguments),
            None => (None, None),
        };
        let server_id = fragment.id.filter(|id| !id.is_empty());

        match self.slots.binary_search_by_key(&index, |s| s.index) {
            Ok(pos) => {
                let call = &mut self.turn.tool_calls[pos];
                if let Some(name) = name {
                    call.function.name.push_str(&name);
                }
                if let Some(arguments) = arguments {
                    call.function.arguments.push_str(&arguments);
                }
                if let Some(id) = server_id {
                    if !self.slots[pos].server_id {
                        call.id = id;
                        self.slots[pos].server_id = true;
                    }
                }
            }
            Err(pos) => {
                let has_id = server_id.is_some();
                let id = server_id.unwrap_or_else(synthesize_call_id);
                let call = ToolCall::new(id, name.unwrap_or_default(), arguments.unwrap_or_default());
                self.turn.tool_calls.insert(pos, call);
                self.slots.insert(
                    pos,
                    Slot {
                        index,
                        server_id: has_id,
                    },
                );
            }
        }
    }
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Callback receiving the partial turn and live metrics.
pub type OnUpdate<'a> = dyn for<'u> FnMut(&'u AssistantTurn, &'u Metrics) + Send + 'a;

/// Drive an accumulator over a byte stream, calling `on_update` after every
/// frame that changes the turn and once more with the final metrics.
pub async fn consume_sse_stream<S, B, E>(
    mut stream: S,
    tracker: MetricsTracker,
    on_update: &mut OnUpdate<'_>,
) -> Result<Completion, InferenceError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut acc = CompletionAccumulator::new(tracker);

    while let Some(item) = stream.next().await {
        let bytes = item.map_err(|e| InferenceError::StreamError {
            reason: format!("stream read error: {e}"),
        })?;
        if acc.push_bytes(bytes.as_ref(), Instant::now())? {
            on_update(acc.turn(), &acc.metrics());
        }
    }

    let completion = acc.finish(Instant::now())?;
    on_update(&completion.turn, &completion.metrics);
    Ok(completion)
}

/// Parse a non-streaming completion body and synthesize a single update.
pub fn parse_completion_body(
    body: &str,
    mut tracker: MetricsTracker,
    on_update: &mut OnUpdate<'_>,
) -> Result<Completion, InferenceError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    if let Some(error) = value.get("error") {
        return Err(upstream_error(error));
    }

    let resp: ChatCompletionResponse =
        serde_json::from_value(value).map_err(|e| InferenceError::StreamError {
            reason: format!("unexpected completion shape: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    let content = choice.message.content.unwrap_or_default();
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let id = tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(synthesize_call_id);
            ToolCall::new(id, tc.function.name, tc.function.arguments)
        })
        .collect();

    let now = Instant::now();
    if !content.is_empty() {
        tracker.record_content(now);
    }
    let metrics = tracker.finish(now, resp.usage.and_then(|u| u.completion_tokens));

    let turn = AssistantTurn {
        content,
        tool_calls,
    };
    on_update(&turn, &metrics);
    Ok(Completion { turn, metrics })
}

/// Read a completion from an HTTP response, streaming or not.
///
/// `text/event-stream` bodies are consumed incrementally. Anything else is
/// read whole; a body that still looks like SSE frames goes through the
/// frame parser, otherwise it is treated as one JSON completion object.
pub async fn read_completion(
    response: reqwest::Response,
    tracker: MetricsTracker,
    on_update: &mut OnUpdate<'_>,
) -> Result<Completion, InferenceError> {
    let is_event_stream = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    if is_event_stream {
        return consume_sse_stream(Box::pin(response.bytes_stream()), tracker, on_update).await;
    }

    let body = response.text().await.map_err(|e| InferenceError::StreamError {
        reason: format!("failed to read response body: {e}"),
    })?;

    if body.trim_start().starts_with("data:") {
        tracing::debug!("completion body has no event-stream content type, parsing frames anyway");
        let chunks = futures::stream::iter([Ok::<_, std::convert::Infallible>(body.into_bytes())]);
        return consume_sse_stream(chunks, tracker, on_update).await;
    }

    parse_completion_body(&body, tracker, on_update)
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn synthesize_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

fn upstream_error(error: &serde_json::Value) -> InferenceError {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| error.as_str().map(str::to_string))
        .unwrap_or_else(|| error.to_string());
    InferenceError::UpstreamError {
        message,
        payload: error.clone(),
    }
}

fn truncate_for_log(s: &str) -> &str {
    const MAX: usize = 200;
    if s.len() <= MAX {
        return s;
    }
    let mut end = MAX;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
