use serde_json::Value;

use super::{AnthropicResponse, AnthropicResponseBlock};
use crate::error::GatewayError;
use crate::protocol::mapping::{openai_finish_to_stop_reason, openai_usage_to_anthropic};
use crate::protocol::openai_chat::{OpenAiChatResponse, OpenAiToolCall};
use crate::tags::{ParsedToolCall, TagParser};
use crate::util::{new_message_id, new_tool_use_id};

/// Convert a non-streaming backend response into a Messages response.
///
/// `client_model` is echoed back verbatim, never the mapped backend name.
///
/// # Errors
///
/// Returns [`GatewayError::Api`] when the backend returned no choices. Tag
/// and tool-argument problems never fail the conversion; they degrade to
/// text blocks.
pub fn encode_anthropic_response(
    response: &OpenAiChatResponse,
    client_model: &str,
) -> Result<AnthropicResponse, GatewayError> {
    let Some(choice) = response.choices.first() else {
        return Err(GatewayError::Api(
            "Backend response contained no choices".into(),
        ));
    };
    let message = &choice.message;

    let mut content = Vec::new();
    if let Some(reasoning) = non_blank(message.reasoning_content.as_deref()) {
        push_markup_blocks(reasoning, &mut content);
    }
    if let Some(text) = non_blank(message.content.as_deref()) {
        push_markup_blocks(text, &mut content);
    }
    for call in message.tool_calls.iter().flatten() {
        content.push(native_tool_use_block(call));
    }
    if content.is_empty() {
        content.push(AnthropicResponseBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = openai_finish_to_stop_reason(choice.finish_reason.as_deref());

    Ok(AnthropicResponse {
        id: new_message_id(),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: client_model.to_string(),
        content,
        stop_reason: Some(stop_reason.as_str().to_string()),
        stop_sequence: None,
        usage: openai_usage_to_anthropic(response.usage.as_ref()),
    })
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|text| !text.trim().is_empty())
}

/// Thoughts, then recovered tool calls, then each run of text outside tags.
fn push_markup_blocks(text: &str, out: &mut Vec<AnthropicResponseBlock>) {
    let parsed = TagParser::parse_complete(text);
    for thought in parsed.thoughts {
        out.push(AnthropicResponseBlock::Text { text: thought });
    }
    for call in &parsed.tool_calls {
        out.push(markup_tool_use_block(call));
    }
    for text in parsed.raw_content {
        if !text.trim().is_empty() {
            out.push(AnthropicResponseBlock::Text { text });
        }
    }
}

fn markup_tool_use_block(call: &ParsedToolCall) -> AnthropicResponseBlock {
    match parse_tool_input(&call.arguments) {
        Some(input) => AnthropicResponseBlock::ToolUse {
            id: new_tool_use_id(),
            name: call.name.clone(),
            input,
        },
        None => {
            tracing::warn!(
                tool = %call.name,
                "tool call recovered from markup has unparseable arguments"
            );
            AnthropicResponseBlock::Text {
                text: format!(
                    "[Tool call '{}' could not be parsed: invalid JSON arguments: {}]",
                    call.name, call.arguments
                ),
            }
        }
    }
}

fn native_tool_use_block(call: &OpenAiToolCall) -> AnthropicResponseBlock {
    let name = &call.function.name;
    match parse_tool_input(&call.function.arguments) {
        Some(input) => AnthropicResponseBlock::ToolUse {
            id: if call.id.is_empty() {
                new_tool_use_id()
            } else {
                call.id.clone()
            },
            name: name.clone(),
            input,
        },
        None => {
            tracing::warn!(tool = %name, "backend tool call has malformed JSON arguments");
            AnthropicResponseBlock::Text {
                text: format!(
                    "[Tool call '{name}' failed: malformed JSON arguments: {}]",
                    call.function.arguments
                ),
            }
        }
    }
}

/// Tool input must be a JSON object; blank arguments read as `{}`.
fn parse_tool_input(arguments: &str) -> Option<Value> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
