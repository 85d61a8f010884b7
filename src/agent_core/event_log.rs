//! EventLogger — append-only JSONL audit trail of tool executions.
//!
//! One logger owns one log file for the life of the process. Sequence
//! numbers continue from the highest value already on disk, so a restart
//! never reuses one. Readers re-parse the whole file per query; lines that
//! fail to parse are skipped with a warning.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use super::errors::AgentError;
use super::sanitize::sanitize;
use super::types::{EventFilter, EventMeta, EventStatus, ToolExecutionEvent};

pub struct EventLogger {
    path: PathBuf,
    /// Last sequence number handed out.
    sequence: Mutex<u64>,
    /// Serializes appends so lines land in dispatch order.
    write_lock: tokio::sync::Mutex<()>,
}

impl EventLogger {
    /// Open (or prepare to create) the log at `path` and seed the sequence
    /// counter from its contents.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| log_err(&path, e))?;
        }

        let seed = max_sequence_on_disk(&path)?;
        tracing::debug!(path = %path.display(), seed, "event log opened");

        Ok(Self {
            path,
            sequence: Mutex::new(seed),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_sequence(&self) -> u64 {
        *self.sequence.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_sequence(&self) -> u64 {
        let mut guard = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
        *guard += 1;
        *guard
    }

    // ─── Event lifecycle ────────────────────────────────────────────────

    /// New `running` event with the next sequence number.
    pub fn start_event(&self, meta: EventMeta) -> ToolExecutionEvent {
        let args_preview = sanitize(&meta.args);
        ToolExecutionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            sequence: self.next_sequence(),
            source: meta.source,
            tool_name: meta.tool_name,
            mcp_tool_name: meta.mcp_tool_name,
            server_id: meta.server_id,
            server_name: meta.server_name,
            replay_of: meta.replay_of,
            args: meta.args,
            args_preview,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: EventStatus::Running,
            error_message: None,
            result: None,
        }
    }

    pub fn finalize_success(
        &self,
        event: ToolExecutionEvent,
        result: &serde_json::Value,
    ) -> ToolExecutionEvent {
        finalize(event, EventStatus::Success, None, Some(sanitize(result)))
    }

    pub fn finalize_error(
        &self,
        event: ToolExecutionEvent,
        message: impl Into<String>,
        partial_result: Option<&serde_json::Value>,
    ) -> ToolExecutionEvent {
        finalize(
            event,
            EventStatus::Error,
            Some(message.into()),
            partial_result.map(sanitize),
        )
    }

    /// Append `event` as one JSON line.
    pub async fn persist(&self, event: &ToolExecutionEvent) -> Result<(), AgentError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| log_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| log_err(&self.path, e))?;
        file.flush().await.map_err(|e| log_err(&self.path, e))?;
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Matching events, newest first, at most `filter.limit()`.
    pub async fn list_events(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<ToolExecutionEvent>, AgentError> {
        let mut events: Vec<_> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        events.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        events.truncate(filter.limit());
        Ok(events)
    }

    pub async fn get_event_by_id(
        &self,
        id: &str,
    ) -> Result<Option<ToolExecutionEvent>, AgentError> {
        Ok(self.read_all().await?.into_iter().find(|e| e.id == id))
    }

    async fn read_all(&self) -> Result<Vec<ToolExecutionEvent>, AgentError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(log_err(&self.path, e)),
        };
        Ok(parse_lines(&self.path, raw.lines()))
    }
}

fn finalize(
    mut event: ToolExecutionEvent,
    status: EventStatus,
    error_message: Option<String>,
    result: Option<serde_json::Value>,
) -> ToolExecutionEvent {
    let ended_at = Utc::now();
    let elapsed = (ended_at - event.started_at).num_milliseconds().max(0);
    event.ended_at = Some(ended_at);
    event.duration_ms = Some(elapsed as u64);
    event.status = status;
    event.error_message = error_message;
    event.result = result;
    event
}

fn parse_lines<'a>(
    path: &Path,
    lines: impl Iterator<Item = &'a str>,
) -> Vec<ToolExecutionEvent> {
    lines
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "skipping malformed event log line"
                );
                None
            }
        })
        .collect()
}

/// Highest `sequence` in the existing log, or 0.
fn max_sequence_on_disk(path: &Path) -> Result<u64, AgentError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(log_err(path, e)),
    };

    let mut max = 0;
    for line in std::io::BufReader::new(file).lines() {
        let line = line.map_err(|e| log_err(path, e))?;
        // only the sequence is needed; tolerate records from other versions
        let seq = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .and_then(|v| v.get("sequence").and_then(|s| s.as_u64()));
        if let Some(seq) = seq {
            max = max.max(seq);
        }
    }
    Ok(max)
}

fn log_err(path: &Path, e: std::io::Error) -> AgentError {
    AgentError::EventLog {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::EventSource;
    use serde_json::json;

    fn logger() -> (tempfile::TempDir, EventLogger) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLogger::open(dir.path().join("logs/tool-calls.jsonl")).unwrap();
        (dir, log)
    }

    async fn record(log: &EventLogger, tool: &str, ok: bool) -> ToolExecutionEvent {
        let event = log.start_event(EventMeta::native(tool, json!({"q": tool})));
        let event = if ok {
            log.finalize_success(event, &json!({"ok": true}))
        } else {
            log.finalize_error(event, "boom", None)
        };
        log.persist(&event).await.unwrap();
        event
    }

    #[test]
    fn test_sequence_starts_at_one() {
        let (_dir, log) = logger();
        let seqs: Vec<u64> = (0..5)
            .map(|_| log.start_event(EventMeta::native("t", json!({}))).sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_sequence_seeded_from_disk() {
        let (dir, log) = logger();
        for _ in 0..3 {
            record(&log, "read_file", true).await;
        }
        let path = dir.path().join("logs/tool-calls.jsonl");
        // garbage lines do not break seeding
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"not json\n"))
            .unwrap();
        drop(log);

        let reopened = EventLogger::open(&path).unwrap();
        assert_eq!(reopened.last_sequence(), 3);
        let next = reopened.start_event(EventMeta::native("t", json!({})));
        assert_eq!(next.sequence, 4);
    }

    #[test]
    fn test_start_event_snapshots_and_redacts() {
        let (_dir, log) = logger();
        let args = json!({"query": "rust", "api_key": "sk-123"});
        let event = log.start_event(EventMeta::native("brave_search", args.clone()));
        assert_eq!(event.status, EventStatus::Running);
        assert_eq!(event.source, EventSource::Native);
        assert_eq!(event.args, args);
        assert_eq!(event.args_preview["api_key"], "[REDACTED]");
        assert_eq!(event.args_preview["query"], "rust");
    }

    #[test]
    fn test_finalize_sets_terminal_fields() {
        let (_dir, log) = logger();
        let event = log.start_event(EventMeta::native("t", json!({})));
        let done = log.finalize_success(event.clone(), &json!({"token": "x", "n": 1}));
        assert_eq!(done.status, EventStatus::Success);
        assert!(done.ended_at.is_some());
        assert!(done.duration_ms.is_some());
        assert_eq!(done.result, Some(json!({"token": "[REDACTED]", "n": 1})));

        let failed = log.finalize_error(event, "nope", Some(&json!({"partial": true})));
        assert_eq!(failed.status, EventStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("nope"));
        assert_eq!(failed.result, Some(json!({"partial": true})));
    }

    #[tokio::test]
    async fn test_list_events_newest_first_with_filters() {
        let (_dir, log) = logger();
        record(&log, "read_file", true).await;
        record(&log, "brave_search", false).await;
        record(&log, "read_file", false).await;

        let all = log.list_events(&EventFilter::default()).await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 2, 1]);

        let errors = log
            .list_events(&EventFilter {
                status: Some("ERROR".into()),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(errors.len(), 2);

        let limited = log
            .list_events(&EventFilter {
                tool_name: Some("read".into()),
                limit: Some(1),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_get_event_by_id() {
        let (_dir, log) = logger();
        let event = record(&log, "read_file", true).await;
        let found = log.get_event_by_id(&event.id).await.unwrap();
        assert_eq!(found, Some(event));
        assert!(log.get_event_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_lists_nothing() {
        let (_dir, log) = logger();
        assert!(log.list_events(&EventFilter::default()).await.unwrap().is_empty());
    }
}
