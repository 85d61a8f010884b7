//! Redaction and truncation for audit payloads.
//!
//! `sanitize` is a fixpoint: running it on its own output changes nothing.
//! Keys are emitted in sorted order so equal content always serializes the
//! same way.

use serde::Serialize;
use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";
pub const DEPTH_EXCEEDED: &str = "[MAX_DEPTH_EXCEEDED]";

/// Nesting below this depth is replaced by [`DEPTH_EXCEEDED`].
pub const MAX_DEPTH: usize = 8;
/// Longest string kept, in chars, including the truncation suffix.
pub const MAX_STRING_CHARS: usize = 8000;
/// Longest array kept, including the trailing marker.
pub const MAX_ARRAY_ITEMS: usize = 200;

/// Room left for the truncation suffix.
const SUFFIX_RESERVE: usize = 64;

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "apikey",
    "api_key",
    "authorization",
    "cookie",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

/// Redacted, size-bounded copy of `value`.
pub fn sanitize(value: &Value) -> Value {
    sanitize_at(value, 0)
}

/// Serialize then sanitize. Unserializable input becomes `{}`.
pub fn sanitize_serializable<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => sanitize(&v),
        Err(e) => {
            tracing::warn!(error = %e, "unserializable audit payload, storing {{}}");
            Value::Object(Map::new())
        }
    }
}

fn sanitize_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(DEPTH_EXCEEDED.to_string());
    }

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                let sanitized = if is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    sanitize_at(&map[key.as_str()], depth + 1)
                };
                out.insert(key.clone(), sanitized);
            }
            Value::Object(out)
        }
        Value::Array(items) if items.len() > MAX_ARRAY_ITEMS => {
            let keep = MAX_ARRAY_ITEMS - 1;
            let mut out: Vec<Value> = items[..keep]
                .iter()
                .map(|v| sanitize_at(v, depth + 1))
                .collect();
            out.push(Value::String(format!(
                "[... {} more items]",
                items.len() - keep
            )));
            Value::Array(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| sanitize_at(v, depth + 1)).collect())
        }
        Value::String(s) => Value::String(truncate_string(s)),
        other => other.clone(),
    }
}

fn truncate_string(s: &str) -> String {
    let total = s.chars().count();
    if total <= MAX_STRING_CHARS {
        return s.to_string();
    }
    let keep = MAX_STRING_CHARS - SUFFIX_RESERVE;
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(&format!("... [truncated {} chars]", total - keep));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_redaction() {
        let out = sanitize(&json!({"api_key": "secret123", "data": "public-value"}));
        assert_eq!(out, json!({"api_key": REDACTED, "data": "public-value"}));
        assert_eq!(sanitize(&out), out);
    }

    #[test]
    fn test_nested_redaction() {
        let input = json!({"config": {"api_key": "nested-secret", "token": "also-secret", "name": "ok"}});
        let out = sanitize(&input);
        assert_eq!(out["config"]["api_key"], REDACTED);
        assert_eq!(out["config"]["token"], REDACTED);
        assert_eq!(out["config"]["name"], "ok");
    }

    #[test]
    fn test_key_match_is_case_insensitive_substring() {
        let out = sanitize(&json!({
            "X-Authorization": "Bearer abc",
            "userPassword": {"nested": true},
            "githubToken": [1, 2],
            "Set-Cookie": "a=b",
            "tokenizer": "also caught",
            "author": "kept"
        }));
        assert_eq!(out["X-Authorization"], REDACTED);
        assert_eq!(out["userPassword"], REDACTED);
        assert_eq!(out["githubToken"], REDACTED);
        assert_eq!(out["Set-Cookie"], REDACTED);
        assert_eq!(out["tokenizer"], REDACTED);
        assert_eq!(out["author"], "kept");
    }

    #[test]
    fn test_depth_limit() {
        let mut deep = json!("leaf");
        for _ in 0..12 {
            deep = json!({ "next": deep });
        }
        let out = sanitize(&deep);

        let mut cursor = &out;
        for _ in 0..MAX_DEPTH {
            cursor = &cursor["next"];
            assert!(cursor.is_object());
        }
        assert_eq!(cursor["next"], DEPTH_EXCEEDED);
        assert_eq!(sanitize(&out), out);
    }

    #[test]
    fn test_long_string_truncated() {
        let long = "a".repeat(MAX_STRING_CHARS + 500);
        let out = sanitize(&json!({ "body": long }));
        let body = out["body"].as_str().unwrap();
        assert!(body.chars().count() <= MAX_STRING_CHARS);
        assert!(body.ends_with(&format!("[truncated {} chars]", 500 + SUFFIX_RESERVE)));
        assert_eq!(sanitize(&out), out);

        let exact = "é".repeat(MAX_STRING_CHARS);
        assert_eq!(sanitize(&json!(exact)), json!(exact));
    }

    #[test]
    fn test_long_array_truncated() {
        let items: Vec<u32> = (0..250).collect();
        let out = sanitize(&json!(items));
        let arr = out.as_array().unwrap();
        assert_eq!(arr.len(), MAX_ARRAY_ITEMS);
        assert_eq!(arr[0], 0);
        assert_eq!(arr[MAX_ARRAY_ITEMS - 1], "[... 51 more items]");
        assert_eq!(sanitize(&out), out);
    }

    #[test]
    fn test_primitives_pass_through() {
        for value in [json!(null), json!(true), json!(42), json!(1.5)] {
            assert_eq!(sanitize(&value), value);
        }
    }

    #[test]
    fn test_sorted_keys_serialize_stably() {
        let a = sanitize(&json!({"b": 1, "a": {"d": 2, "c": 3}}));
        let text = serde_json::to_string(&a).unwrap();
        assert_eq!(text, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_sanitize_serializable() {
        #[derive(Serialize)]
        struct Payload {
            password: &'static str,
            user: &'static str,
        }
        let out = sanitize_serializable(&Payload {
            password: "hunter2",
            user: "ada",
        });
        assert_eq!(out, json!({"password": REDACTED, "user": "ada"}));

        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        assert_eq!(sanitize_serializable(&bad), json!({}));
    }
}
