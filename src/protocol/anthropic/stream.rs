use crate::protocol::anthropic::AnthropicStreamEvent;
use crate::stream::sse::anthropic_sse_frame_into;

/// Parse a named Messages SSE event into a typed stream event.
///
/// The `event_type` is the value after `event:` and `data` the JSON payload.
/// Unknown event names and malformed payloads yield `None`.
#[must_use]
pub fn parse_anthropic_sse(event_type: &str, data: &str) -> Option<AnthropicStreamEvent> {
    match event_type {
        "message_start"
        | "content_block_start"
        | "content_block_delta"
        | "content_block_stop"
        | "message_delta"
        | "message_stop" => serde_json::from_str(data).ok(),
        _ => None,
    }
}

/// Render one stream event as an `event: <type>\ndata: <json>\n\n` frame.
#[must_use]
pub fn encode_anthropic_sse_frame(event: &AnthropicStreamEvent) -> String {
    let mut out = String::new();
    encode_anthropic_sse_frame_into(event, &mut out);
    out
}

/// Append the frame for `event` to a caller-provided buffer.
pub fn encode_anthropic_sse_frame_into(event: &AnthropicStreamEvent, out: &mut String) {
    match serde_json::to_string(event) {
        Ok(json) => anthropic_sse_frame_into(out, event.event_type(), &json),
        Err(err) => {
            // Only reachable if a payload stops being plain data.
            tracing::error!(event = event.event_type(), error = %err, "failed to serialize stream event");
        }
    }
}
