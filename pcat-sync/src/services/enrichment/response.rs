//! Interpretation of analysis service replies
//!
//! A reply becomes either an [`AnalysisResult`] or a terminal
//! [`FailureMarker`]. Malformed replies are never retried: they carry the raw
//! content so they can be inspected later.

use crate::models::{AnalysisResult, FailureMarker, FailureReason};
use crate::services::analysis_client::AnalysisReply;
use serde::Deserialize;
use serde_json::Value;

/// Fields a reply object must carry
pub const REQUIRED_KEYS: [&str; 3] = ["ocr_text", "visual_description", "keywords"];

/// Turn a service reply into a stored value
pub fn interpret(reply: &AnalysisReply, filename: &str) -> Result<AnalysisResult, FailureMarker> {
    let raw = match reply.content.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ if reply.truncated() => {
            tracing::warn!(filename = %filename, "No content returned and output was cut at the length cap");
            return Err(FailureMarker::new(FailureReason::NoContentFinishLength));
        }
        _ => {
            tracing::warn!(
                filename = %filename,
                finish_reason = ?reply.finish_reason,
                "Reply carried no usable content"
            );
            return Err(FailureMarker::new(FailureReason::UnexpectedStructure));
        }
    };

    let body = strip_code_fences(raw);
    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(e) => match extract_json_from_text(body) {
            Some(value) => value,
            None => {
                warn_if_truncated(reply, filename);
                tracing::warn!(filename = %filename, error = %e, "Reply is not valid JSON");
                return Err(FailureMarker::new(FailureReason::JsonDecodeError).with_raw_content(raw));
            }
        },
    };

    let Some(object) = value.as_object() else {
        tracing::warn!(filename = %filename, "Reply JSON is not an object");
        return Err(FailureMarker::new(FailureReason::JsonDecodeError).with_raw_content(raw));
    };

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        warn_if_truncated(reply, filename);
        tracing::warn!(filename = %filename, missing = ?missing, "Reply is missing required fields");
        return Err(FailureMarker::new(FailureReason::MissingKeys).with_raw_content(raw));
    }

    AnalysisResult::deserialize(&value).map_err(|e| {
        tracing::warn!(filename = %filename, error = %e, "Reply fields have unexpected types");
        FailureMarker::new(FailureReason::JsonDecodeError)
            .with_raw_content(raw)
            .with_details(e.to_string())
    })
}

fn warn_if_truncated(reply: &AnalysisReply, filename: &str) {
    if reply.truncated() {
        tracing::warn!(filename = %filename, "Reply was probably cut at the output length cap");
    }
}

/// Remove a surrounding fenced code block (with or without a language tag)
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop a language tag such as `json` on the opening fence line
    let tag_len = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    let inner = &inner[tag_len..];

    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// First JSON object embedded anywhere in `raw`
fn extract_json_from_text(raw: &str) -> Option<Value> {
    for (idx, ch) in raw.char_indices() {
        if ch != '{' {
            continue;
        }
        let mut deserializer = serde_json::Deserializer::from_str(&raw[idx..]);
        if let Ok(value) = Value::deserialize(&mut deserializer) {
            return Some(value);
        }
    }
    None
}
