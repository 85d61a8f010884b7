//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility — these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while requesting or consuming a chat completion.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The byte stream broke mid-response, or a non-streaming body was unreadable.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// A stream frame carried an explicit `error` object. Fatal for this attempt.
    #[error("model endpoint reported an error: {message}")]
    UpstreamError {
        message: String,
        payload: serde_json::Value,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether the failure happened before any response arrived (endpoint down,
    /// wrong URL, timeout). Used to pick the guidance shown to the user.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        )
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unreachable() {
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_unreachable());
        assert!(InferenceError::ConnectionFailed {
            endpoint: "http://localhost:1234/v1".into(),
            reason: "refused".into(),
        }
        .is_unreachable());
        assert!(!InferenceError::HttpError {
            status: 401,
            body: "unauthorized".into(),
        }
        .is_unreachable());
    }

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
    }

    #[test]
    fn test_upstream_error_display() {
        let err = InferenceError::UpstreamError {
            message: "rate limited".into(),
            payload: serde_json::json!({"message": "rate limited"}),
        };
        assert_eq!(err.to_string(), "model endpoint reported an error: rate limited");
    }
}
