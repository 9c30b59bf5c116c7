//! Classification of upstream errors that indicate quota exhaustion.
//!
//! Quota trouble is the only error class the key pool rotates on, so the
//! classifier errs on the side of recognizing every phrasing the API has
//! been observed to use: a bare 429, a `RESOURCE_EXHAUSTED` status token,
//! or quota/rate-limit wording. Error bodies arrive as plain text, as a
//! structured `{"error": {...}}` object, or as JSON that itself encodes the
//! error object as a string.

use lyre_ai::LyreAiError;
use serde_json::Value;

/// Returns true when `error` reports upstream quota exhaustion.
pub fn is_quota_error(error: &LyreAiError) -> bool {
    match error {
        LyreAiError::HttpStatus { status, body } => {
            *status == 429 || body_reports_quota_exhaustion(body)
        }
        _ => false,
    }
}

/// Inspects a response body for quota signals, tolerating every known shape.
pub fn body_reports_quota_exhaustion(body: &str) -> bool {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if value_reports_quota(&value) {
            return true;
        }
    }
    quota_text_signature(body)
}

fn value_reports_quota(value: &Value) -> bool {
    match value {
        Value::String(text) => {
            // JSON-stringified error bodies nest the real payload one level
            // down; unwrap before pattern matching.
            if let Ok(nested) = serde_json::from_str::<Value>(text) {
                if value_reports_quota(&nested) {
                    return true;
                }
            }
            quota_text_signature(text)
        }
        Value::Object(map) => {
            if let Some(error) = map.get("error") {
                if value_reports_quota(error) {
                    return true;
                }
            }
            if map.get("code").and_then(Value::as_u64) == Some(429) {
                return true;
            }
            if let Some(status) = map.get("status").and_then(Value::as_str) {
                if quota_text_signature(status) {
                    return true;
                }
            }
            if let Some(message) = map.get("message").and_then(Value::as_str) {
                if quota_text_signature(message) {
                    return true;
                }
            }
            false
        }
        Value::Array(items) => items.iter().any(value_reports_quota),
        _ => false,
    }
}

fn quota_text_signature(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("resource_exhausted")
        || lowered.contains("resource exhausted")
        || lowered.contains("quota")
        || lowered.contains("rate limit")
        || lowered.contains("rate-limit")
        || lowered.contains("too many requests")
}
