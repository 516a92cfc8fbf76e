use serde_json::Value;

use crate::error::ErrorCategory;

// ---------------------------------------------------------------------------
// Outbound error document
// ---------------------------------------------------------------------------

#[must_use]
pub(crate) fn anthropic_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::NotSupported => "not_supported_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::NotFound => "not_found_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::Timeout => "timeout_error",
        ErrorCategory::Network => "network_error",
        ErrorCategory::Api => "api_error",
        ErrorCategory::Internal => "internal_error",
    }
}

#[must_use]
pub(crate) fn anthropic_error_payload(cat: ErrorCategory, message: &str) -> Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": anthropic_error_type(cat),
            "message": message,
        }
    })
}

// ---------------------------------------------------------------------------
// Backend error bodies
// ---------------------------------------------------------------------------

/// Error detail recovered from a backend error body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpstreamErrorShape {
    pub(crate) shape: &'static str,
    pub(crate) message: String,
    pub(crate) error_type: Option<String>,
}

type ErrorShapeMatcher = fn(&Value) -> Option<UpstreamErrorShape>;

/// Matchers tried in order; the first hit wins.
const UPSTREAM_ERROR_SHAPES: &[ErrorShapeMatcher] = &[
    match_openai_error_object,
    match_anthropic_envelope,
    match_string_error,
    match_top_level_message,
    match_detail,
];

/// Extract a human-readable message from a backend error body.
///
/// Known JSON shapes are tried in order; anything else falls back to the raw
/// body text, or a status line when the body is empty.
#[must_use]
pub(crate) fn normalize_upstream_error(status: u16, body: &[u8]) -> UpstreamErrorShape {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(shape) = UPSTREAM_ERROR_SHAPES
            .iter()
            .find_map(|matcher| matcher(&value))
        {
            return shape;
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    let message = if text.is_empty() {
        format!("Backend returned HTTP {status}")
    } else {
        text.to_string()
    };
    UpstreamErrorShape {
        shape: "raw",
        message,
        error_type: None,
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn match_openai_error_object(value: &Value) -> Option<UpstreamErrorShape> {
    if value.get("type").and_then(Value::as_str) == Some("error") {
        return None;
    }
    let error = value.get("error")?.as_object()?;
    Some(UpstreamErrorShape {
        shape: "openai",
        message: non_blank(error.get("message"))?,
        error_type: non_blank(error.get("type")).or_else(|| non_blank(error.get("code"))),
    })
}

fn match_anthropic_envelope(value: &Value) -> Option<UpstreamErrorShape> {
    if value.get("type").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let error = value.get("error")?.as_object()?;
    Some(UpstreamErrorShape {
        shape: "anthropic",
        message: non_blank(error.get("message"))?,
        error_type: non_blank(error.get("type")),
    })
}

fn match_string_error(value: &Value) -> Option<UpstreamErrorShape> {
    Some(UpstreamErrorShape {
        shape: "string_error",
        message: non_blank(value.get("error"))?,
        error_type: None,
    })
}

fn match_top_level_message(value: &Value) -> Option<UpstreamErrorShape> {
    Some(UpstreamErrorShape {
        shape: "message",
        message: non_blank(value.get("message"))?,
        error_type: non_blank(value.get("type")),
    })
}

fn match_detail(value: &Value) -> Option<UpstreamErrorShape> {
    let message = match value.get("detail")? {
        Value::String(text) if !text.trim().is_empty() => text.clone(),
        Value::Null | Value::String(_) => return None,
        other => other.to_string(),
    };
    Some(UpstreamErrorShape {
        shape: "detail",
        message,
        error_type: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_error_payload_shape() {
        let body = anthropic_error_payload(ErrorCategory::Timeout, "slow");
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "timeout_error");
        assert_eq!(body["error"]["message"], "slow");
    }

    #[test]
    fn test_openai_error_object() {
        let body = br#"{"error":{"message":"Invalid model","type":"invalid_request_error"}}"#;
        let shape = normalize_upstream_error(400, body);
        assert_eq!(shape.shape, "openai");
        assert_eq!(shape.message, "Invalid model");
        assert_eq!(shape.error_type.as_deref(), Some("invalid_request_error"));
    }

    #[test]
    fn test_anthropic_envelope() {
        let body = br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let shape = normalize_upstream_error(529, body);
        assert_eq!(shape.shape, "anthropic");
        assert_eq!(shape.message, "Overloaded");
    }

    #[test]
    fn test_string_error_and_message_and_detail() {
        assert_eq!(
            normalize_upstream_error(500, br#"{"error":"boom"}"#).message,
            "boom"
        );
        assert_eq!(
            normalize_upstream_error(500, br#"{"message":"nope"}"#).shape,
            "message"
        );
        let detail = normalize_upstream_error(422, br#"{"detail":[{"loc":["body"]}]}"#);
        assert_eq!(detail.shape, "detail");
        assert!(detail.message.contains("loc"));
    }

    #[test]
    fn test_raw_fallback() {
        let shape = normalize_upstream_error(502, b"Bad Gateway\n");
        assert_eq!(shape.shape, "raw");
        assert_eq!(shape.message, "Bad Gateway");
        assert_eq!(
            normalize_upstream_error(503, b"").message,
            "Backend returned HTTP 503"
        );
    }
}
