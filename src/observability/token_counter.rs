use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicRequest, AnthropicUsage,
};
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

fn estimate_content_tokens(content: &AnthropicContent) -> u64 {
    let blocks = match content {
        AnthropicContent::Text(text) => return estimate_tokens(text),
        AnthropicContent::Blocks(blocks) => blocks,
    };
    blocks
        .iter()
        .map(|block| match block {
            AnthropicContentBlock::Text { text } => estimate_tokens(text),
            AnthropicContentBlock::Thinking { thinking } => estimate_tokens(thinking),
            AnthropicContentBlock::ToolUse { name, input, .. } => {
                estimate_tokens(name) + estimate_tokens(&input.to_string())
            }
            AnthropicContentBlock::ToolResult { content, .. } => {
                content.as_ref().map_or(0, estimate_content_tokens)
            }
            // Images and other media are not counted via text tokenization
            _ => 0,
        })
        .sum()
}

/// Estimate the total input tokens for an inbound request.
///
/// Sums tokens from the system prompt, all text-bearing blocks of messages,
/// and serialized tool definitions.
#[must_use]
pub fn estimate_request_tokens(request: &AnthropicRequest) -> u64 {
    let mut total: u64 = 0;

    if let Some(system) = &request.system {
        total += estimate_content_tokens(system);
    }

    for message in &request.messages {
        total += estimate_content_tokens(&message.content);
    }

    for tool in request.tools.iter().flatten() {
        total += estimate_tokens(&tool.name);
        if let Some(description) = &tool.description {
            total += estimate_tokens(description);
        }
        total += estimate_tokens(&tool.input_schema.to_string());
    }

    total
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(
    model: &str,
    backend_model: &str,
    usage: &AnthropicUsage,
    stream: bool,
    duration: Duration,
) {
    info!(
        model = model,
        backend_model = backend_model,
        stream = stream,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
