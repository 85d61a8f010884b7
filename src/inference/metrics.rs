//! Client-side generation telemetry.
//!
//! Time-to-first-token and a live tokens/sec estimate, computed from content
//! increments as they arrive. A "token" here is one non-empty content delta.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-generation telemetry. Every field stays `None` until measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Milliseconds from request start to the first content byte.
    pub ttft: Option<u64>,
    pub tokens_per_sec: Option<f64>,
    pub total_tokens: Option<u64>,
    /// Milliseconds from request start to stream close.
    pub total_latency: Option<u64>,
}

/// Tracks one completion request's timing.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    started_at: Instant,
    first_token_at: Option<Instant>,
    increments: u64,
    metrics: Metrics,
}

impl MetricsTracker {
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn start_at(started_at: Instant) -> Self {
        Self {
            started_at,
            first_token_at: None,
            increments: 0,
            metrics: Metrics::default(),
        }
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    /// Record one content increment observed at `now`.
    pub fn record_content(&mut self, now: Instant) {
        self.increments += 1;
        let first = match self.first_token_at {
            Some(first) => first,
            None => {
                self.metrics.ttft = Some(millis(now.saturating_duration_since(self.started_at)));
                self.first_token_at = Some(now);
                now
            }
        };
        self.metrics.total_tokens = Some(self.increments);
        self.metrics.tokens_per_sec = Some(rate(
            self.increments,
            now.saturating_duration_since(first),
        ));
    }

    /// Close out the measurement. `reported_tokens` (from `usage`) wins over the
    /// counted increments when the endpoint supplies it.
    pub fn finish(&mut self, now: Instant, reported_tokens: Option<u64>) -> Metrics {
        let since_start = now.saturating_duration_since(self.started_at);
        let window = match self.first_token_at {
            Some(first) => now.saturating_duration_since(first),
            None => since_start,
        };
        let tokens = reported_tokens.unwrap_or(self.increments);

        self.metrics.total_latency = Some(millis(since_start));
        self.metrics.total_tokens = Some(tokens);
        self.metrics.tokens_per_sec = Some(rate(tokens, window));
        self.metrics
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn rate(count: u64, window: Duration) -> f64 {
    let secs = window.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_unmeasured() {
        let tracker = MetricsTracker::start();
        assert_eq!(tracker.metrics(), Metrics::default());
    }

    #[test]
    fn test_ttft_recorded_once() {
        let t0 = Instant::now();
        let mut tracker = MetricsTracker::start_at(t0);
        tracker.record_content(t0 + Duration::from_millis(250));
        tracker.record_content(t0 + Duration::from_millis(750));

        let m = tracker.metrics();
        assert_eq!(m.ttft, Some(250));
        assert_eq!(m.total_tokens, Some(2));
        // 2 increments over 0.5s since first token
        assert!((m.tokens_per_sec.unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_finish_uses_first_token_window() {
        let t0 = Instant::now();
        let mut tracker = MetricsTracker::start_at(t0);
        tracker.record_content(t0 + Duration::from_secs(1));
        tracker.record_content(t0 + Duration::from_secs(2));
        let m = tracker.finish(t0 + Duration::from_secs(3), None);

        assert_eq!(m.total_latency, Some(3000));
        assert!((m.tokens_per_sec.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_finish_without_tokens_uses_start_window() {
        let t0 = Instant::now();
        let mut tracker = MetricsTracker::start_at(t0);
        let m = tracker.finish(t0 + Duration::from_secs(2), Some(10));

        assert_eq!(m.ttft, None);
        assert_eq!(m.total_tokens, Some(10));
        assert!((m.tokens_per_sec.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(Metrics::default()).unwrap();
        assert!(json.get("tokensPerSec").is_some());
        assert!(json.get("totalLatency").is_some());
    }
}
