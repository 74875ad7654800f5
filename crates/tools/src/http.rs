//! Shared plumbing for the downstream HTTP calls made by capabilities.
//!
//! Every capability converts failures into text for the model; [`CallError`]
//! renders as the detail part of those `エラー: ...` lines.

use hisho_core::error::ToolError;
use reqwest::RequestBuilder;
use serde_json::Value;
use std::time::Duration;

/// Build the client shared by every capability set of a factory.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// A downstream call that did not produce a usable response.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Non-accepted status, rendered `<status> - <body>`
    #[error("{status} - {body}")]
    Status { status: u16, body: String },

    /// Connect failure, timeout or undecodable body
    #[error("{0}")]
    Transport(String),
}

/// Send `request` and decode the JSON body when the status is in `accepted`.
pub(crate) async fn send_json(request: RequestBuilder, accepted: &[u16]) -> Result<Value, CallError> {
    let response = request
        .send()
        .await
        .map_err(|e| CallError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    if !accepted.contains(&status) {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status, "Downstream call rejected");
        return Err(CallError::Status { status, body });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| CallError::Transport(e.to_string()))
}

/// String field of a JSON object, `None` for missing or null.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Characters `from..to` of `s` (clamped to its length).
pub(crate) fn char_slice(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from).take(to.saturating_sub(from)).collect()
}

// --- Argument extraction ---

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// Optional string argument; null and absent are the same.
pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Optional string argument that is also dropped when empty.
pub(crate) fn non_empty_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    optional_str(args, key).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn char_slice_counts_characters() {
        assert_eq!(char_slice("2026-01-15T09:00:00.0000000", 0, 16), "2026-01-15T09:00");
        assert_eq!(char_slice("2026-01-15T10:00:00", 11, 16), "10:00");
        assert_eq!(char_slice("short", 11, 16), "");
    }

    #[test]
    fn argument_helpers() {
        let args = json!({"title": "資料作成", "body": "", "due_date": null});
        assert_eq!(required_str(&args, "title").unwrap(), "資料作成");
        assert!(matches!(
            required_str(&args, "list_id"),
            Err(ToolError::InvalidArguments(_))
        ));
        assert_eq!(optional_str(&args, "body"), Some(""));
        assert_eq!(non_empty_str(&args, "body"), None);
        assert_eq!(optional_str(&args, "due_date"), None);
    }

    #[test]
    fn status_error_format() {
        let err = CallError::Status {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(format!("エラー: {err}"), "エラー: 404 - not found");
    }
}
