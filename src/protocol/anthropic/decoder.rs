use std::borrow::Cow;

use super::{
    AnthropicContent, AnthropicContentBlock, AnthropicRequest, AnthropicTool,
    AnthropicToolChoice, AnthropicToolChoiceObject,
};
use crate::error::GatewayError;
use crate::protocol::mapping::anthropic_role_to_openai;
use crate::protocol::openai_chat::{
    OpenAiChatRequest, OpenAiMessage, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall,
    OpenAiToolCallFunction, OpenAiToolChoice, OpenAiToolFunction,
};
use crate::routing::ModelMapper;

/// Request conversion switches taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Replace image blocks with a `[Image: <media_type>]` text marker
    /// instead of rejecting the request.
    pub image_placeholder: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            image_placeholder: true,
        }
    }
}

/// A validated inbound request converted to the backend shape.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    pub backend: OpenAiChatRequest,
    /// Model string exactly as the client sent it; echoed in responses.
    pub client_model: String,
    pub stream: bool,
}

/// Validate an inbound Messages request and convert it into a backend chat request.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for missing or malformed fields,
/// roles outside `user`/`assistant`, and blocks placed on the wrong role, or
/// [`GatewayError::NotSupported`] for audio and file content.
pub fn decode_anthropic_request(
    request: &AnthropicRequest,
    mapper: &ModelMapper,
    options: DecodeOptions,
) -> Result<DecodedRequest, GatewayError> {
    let client_model = request
        .model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("model: field is required".into()))?;
    let max_tokens = match request.max_tokens {
        Some(n) if n > 0 => n.unsigned_abs(),
        Some(_) => {
            return Err(GatewayError::InvalidRequest(
                "max_tokens: must be greater than 0".into(),
            ))
        }
        None => {
            return Err(GatewayError::InvalidRequest(
                "max_tokens: field is required".into(),
            ))
        }
    };
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages: at least one message is required".into(),
        ));
    }

    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        let text = system_text(system);
        if !text.trim().is_empty() {
            messages.push(OpenAiMessage::text("system", text));
        }
    }

    for (index, message) in request.messages.iter().enumerate() {
        let role = anthropic_role_to_openai(&message.role).ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "messages[{index}].role: unsupported role '{}', expected 'user' or 'assistant'",
                message.role
            ))
        })?;
        match &message.content {
            AnthropicContent::Text(text) => messages.push(OpenAiMessage::text(role, text.clone())),
            AnthropicContent::Blocks(blocks) => {
                decode_blocks(index, role, blocks, options, &mut messages)?;
            }
        }
    }

    let tools = request
        .tools
        .as_deref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(decode_tool).collect::<Vec<_>>());
    let tool_choice = match (&tools, &request.tool_choice) {
        (None, _) => None,
        (Some(_), None) => Some(OpenAiToolChoice::mode("auto")),
        (Some(_), Some(choice)) => Some(decode_tool_choice(choice)?),
    };

    let stream = request.stream.unwrap_or(false);
    let backend = OpenAiChatRequest {
        model: mapper.resolve(client_model).into_owned(),
        messages,
        tools,
        tool_choice,
        stream: stream.then_some(true),
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: Some(max_tokens),
        stop: request
            .stop_sequences
            .clone()
            .filter(|stop| !stop.is_empty()),
    };

    Ok(DecodedRequest {
        backend,
        client_model: client_model.to_string(),
        stream,
    })
}

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

fn decode_blocks(
    index: usize,
    role: &'static str,
    blocks: &[AnthropicContentBlock],
    options: DecodeOptions,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), GatewayError> {
    let mut text_parts: Vec<Cow<'_, str>> = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_messages = Vec::new();

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text } => text_parts.push(Cow::Borrowed(text)),
            AnthropicContentBlock::Image { source } => {
                if !options.image_placeholder {
                    return Err(GatewayError::InvalidRequest(format!(
                        "messages[{index}]: image content is not supported by the backend"
                    )));
                }
                let media_type = source.media_type.as_deref().unwrap_or("unknown");
                text_parts.push(Cow::Owned(format!("[Image: {media_type}]")));
            }
            AnthropicContentBlock::ToolUse { id, name, input } => {
                if role != "assistant" {
                    return Err(GatewayError::InvalidRequest(format!(
                        "messages[{index}]: tool_use blocks are only allowed in assistant messages"
                    )));
                }
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    type_: "function".to_string(),
                    function: OpenAiToolCallFunction {
                        name: name.clone(),
                        arguments: tool_input_json(input),
                    },
                });
            }
            AnthropicContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                if role != "user" {
                    return Err(GatewayError::InvalidRequest(format!(
                        "messages[{index}]: tool_result blocks are only allowed in user messages"
                    )));
                }
                let mut text = content.as_ref().map(tool_result_text).unwrap_or_default();
                if is_error.unwrap_or(false) {
                    text.insert_str(0, "Error: ");
                }
                tool_messages.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(text),
                    tool_call_id: Some(tool_use_id.clone()),
                    ..OpenAiMessage::default()
                });
            }
            AnthropicContentBlock::InputAudio {} => return Err(unsupported("input_audio")),
            AnthropicContentBlock::File {} => return Err(unsupported("file")),
            AnthropicContentBlock::Document {} => return Err(unsupported("document")),
            AnthropicContentBlock::Thinking { .. } | AnthropicContentBlock::RedactedThinking {} => {
                tracing::debug!(message_index = index, "dropping thinking block from history");
            }
            AnthropicContentBlock::Unknown => {
                tracing::debug!(message_index = index, "dropping unknown content block");
            }
        }
    }

    let text = text_parts.join("\n");

    let had_tool_messages = !tool_messages.is_empty();
    out.extend(tool_messages);

    if !tool_calls.is_empty() {
        out.push(OpenAiMessage {
            role: role.to_string(),
            content: (!text.is_empty()).then_some(text),
            tool_calls: Some(tool_calls),
            ..OpenAiMessage::default()
        });
    } else if !text.is_empty() || !had_tool_messages {
        out.push(OpenAiMessage::text(role, text));
    }
    Ok(())
}

fn unsupported(modality: &str) -> GatewayError {
    GatewayError::NotSupported(format!("Unsupported content type: {modality}"))
}

fn tool_input_json(input: &serde_json::Value) -> String {
    if input.is_null() {
        "{}".to_string()
    } else {
        input.to_string()
    }
}

fn tool_result_text(content: &AnthropicContent) -> String {
    match content {
        AnthropicContent::Text(text) => text.clone(),
        AnthropicContent::Blocks(blocks) => join_text_blocks(blocks),
    }
}

fn system_text(system: &AnthropicContent) -> String {
    match system {
        AnthropicContent::Text(text) => text.clone(),
        AnthropicContent::Blocks(blocks) => join_text_blocks(blocks),
    }
}

fn join_text_blocks(blocks: &[AnthropicContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if let AnthropicContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

fn decode_tool(tool: &AnthropicTool) -> OpenAiTool {
    let parameters = if tool.input_schema.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        tool.input_schema.clone()
    };
    OpenAiTool {
        type_: "function".to_string(),
        function: OpenAiToolFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters,
        },
    }
}

fn decode_tool_choice(choice: &AnthropicToolChoice) -> Result<OpenAiToolChoice, GatewayError> {
    match choice {
        AnthropicToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Ok(OpenAiToolChoice::mode("auto")),
            "any" | "required" => Ok(OpenAiToolChoice::mode("required")),
            "none" => Ok(OpenAiToolChoice::mode("none")),
            other => Err(GatewayError::InvalidRequest(format!(
                "tool_choice: unsupported value '{other}'"
            ))),
        },
        AnthropicToolChoice::Object(AnthropicToolChoiceObject { type_, name }) => {
            let name = name.as_deref().map(str::trim).filter(|n| !n.is_empty());
            match (type_.as_deref(), name) {
                (Some("auto"), _) => Ok(OpenAiToolChoice::mode("auto")),
                (Some("any"), _) => Ok(OpenAiToolChoice::mode("required")),
                (Some("none"), _) => Ok(OpenAiToolChoice::mode("none")),
                (Some("tool") | None, Some(name)) => Ok(OpenAiToolChoice::function(name)),
                (Some("tool") | None, None) => Err(GatewayError::InvalidRequest(
                    "tool_choice: a tool name is required".into(),
                )),
                (Some(other), _) => Err(GatewayError::InvalidRequest(format!(
                    "tool_choice: unsupported type '{other}'"
                ))),
            }
        }
    }
}
