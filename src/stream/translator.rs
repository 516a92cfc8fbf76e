use crate::protocol::anthropic::{
    AnthropicDelta, AnthropicDeltaUsage, AnthropicMessageDeltaBody, AnthropicMessageStart,
    AnthropicResponseBlock, AnthropicStreamEvent, AnthropicUsage,
};
use crate::protocol::mapping::{openai_finish_to_stop_reason, StopReason};
use crate::protocol::openai_chat::{OpenAiStreamChunk, OpenAiStreamToolCall};
use crate::tags::{TagParser, TagSegment};
use crate::util::{new_message_id, new_tool_use_id};

/// Lifecycle of one translated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    NotStarted,
    Streaming,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    ToolUse { backend_index: u32 },
}

/// Per-request translator from backend chat chunks to Messages stream events.
///
/// Chunks must be fed in arrival order from a single task. Output events
/// always form a well-formed sequence: one `message_start`, one start/stop
/// pair per content index, and a terminal `message_delta` + `message_stop`.
#[derive(Debug)]
pub struct StreamTranslator {
    state: TranslatorState,
    message_id: String,
    client_model: String,
    tag_parser: TagParser,
    segments: Vec<TagSegment>,
    block_index: usize,
    open_block: Option<OpenBlock>,
    usage: Option<AnthropicUsage>,
    emitted_bytes: usize,
}

impl StreamTranslator {
    #[must_use]
    pub fn new(client_model: &str) -> Self {
        Self {
            state: TranslatorState::NotStarted,
            message_id: new_message_id(),
            client_model: client_model.to_string(),
            tag_parser: TagParser::new(),
            segments: Vec::new(),
            block_index: 0,
            open_block: None,
            usage: None,
            emitted_bytes: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> TranslatorState {
        self.state
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Usage reported by the backend, or an estimate from the emitted text
    /// when the backend reported none.
    #[must_use]
    pub fn usage(&self) -> AnthropicUsage {
        self.usage.unwrap_or_else(|| AnthropicUsage {
            input_tokens: 0,
            output_tokens: (self.emitted_bytes as u64).div_ceil(4),
        })
    }

    /// Translate one backend chunk (the JSON payload of a `data:` line).
    pub fn translate_chunk(&mut self, data: &str) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();
        self.translate_chunk_into(data, &mut out);
        out
    }

    /// Translate one backend chunk into a caller-provided buffer.
    ///
    /// Malformed chunks are logged and skipped; chunks after the message has
    /// ended are ignored.
    pub fn translate_chunk_into(&mut self, data: &str, out: &mut Vec<AnthropicStreamEvent>) {
        let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed backend stream chunk");
                return;
            }
        };
        if let Some(usage) = chunk.usage {
            self.usage = Some(AnthropicUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }
        // Trailing usage-only chunks still update the totals for logging.
        if self.state == TranslatorState::Ended {
            tracing::debug!("ignoring backend chunk content after message end");
            return;
        }
        self.ensure_started(out);
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };
        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.as_deref() {
            self.feed_text(reasoning, out);
        }
        if let Some(content) = delta.content.as_deref() {
            self.feed_text(content, out);
        }
        for call in delta.tool_calls.iter().flatten() {
            self.native_tool_call(call, out);
        }

        let Some(finish_reason) = choice.finish_reason.as_deref() else {
            return;
        };
        let content_blank = delta.content.as_deref().map_or(true, |c| c.trim().is_empty());
        let reasoning_present = delta
            .reasoning_content
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if finish_reason == "stop" && content_blank && reasoning_present {
            // Reasoning models may report `stop` at the end of the reasoning
            // phase; the answer is still to come.
            tracing::debug!("suppressing stop that arrived with reasoning only");
            return;
        }
        self.end_message(openai_finish_to_stop_reason(Some(finish_reason)), out);
    }

    /// Flush text the tag parser is still withholding.
    pub fn finalize_into(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.state == TranslatorState::Ended {
            return;
        }
        self.ensure_started(out);
        self.tag_parser.finalize_into(&mut self.segments);
        self.emit_segments(out);
    }

    /// Best-effort close when the backend stream ended without a usable
    /// finish reason. No-op once the message has ended.
    pub fn close_into(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.state == TranslatorState::Ended {
            return;
        }
        self.end_message(StopReason::EndTurn, out);
    }

    /// [`finalize_into`](Self::finalize_into) followed by
    /// [`close_into`](Self::close_into).
    pub fn finish(&mut self) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();
        self.finalize_into(&mut out);
        self.close_into(&mut out);
        out
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_started(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.state != TranslatorState::NotStarted {
            return;
        }
        out.push(AnthropicStreamEvent::MessageStart {
            message: AnthropicMessageStart {
                id: self.message_id.clone(),
                type_: "message".to_string(),
                role: "assistant".to_string(),
                model: self.client_model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage::default(),
            },
        });
        out.push(AnthropicStreamEvent::ContentBlockStart {
            index: 0,
            content_block: AnthropicResponseBlock::Text {
                text: String::new(),
            },
        });
        self.block_index = 0;
        self.open_block = Some(OpenBlock::Text);
        self.state = TranslatorState::Streaming;
    }

    fn feed_text(&mut self, text: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if text.is_empty() {
            return;
        }
        self.tag_parser.feed_into(text, &mut self.segments);
        self.emit_segments(out);
    }

    fn emit_segments(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        let mut segments = std::mem::take(&mut self.segments);
        for segment in segments.drain(..) {
            let text = match segment {
                TagSegment::Text(text) | TagSegment::Thought(text) => text,
                TagSegment::ToolCall(call) => call.render_inline(),
            };
            self.emit_text_delta(text, out);
        }
        self.segments = segments;
    }

    fn emit_text_delta(&mut self, text: String, out: &mut Vec<AnthropicStreamEvent>) {
        if text.is_empty() {
            return;
        }
        if self.open_block != Some(OpenBlock::Text) {
            self.close_block(out);
            self.start_block(
                OpenBlock::Text,
                AnthropicResponseBlock::Text {
                    text: String::new(),
                },
                out,
            );
        }
        self.emitted_bytes += text.len();
        out.push(AnthropicStreamEvent::ContentBlockDelta {
            index: self.block_index,
            delta: AnthropicDelta::TextDelta { text },
        });
    }

    fn native_tool_call(&mut self, call: &OpenAiStreamToolCall, out: &mut Vec<AnthropicStreamEvent>) {
        let function = call.function.as_ref();
        let continues_open_call =
            self.open_block == Some(OpenBlock::ToolUse { backend_index: call.index });
        if !continues_open_call {
            self.close_block(out);
            let id = call
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_tool_use_id);
            let name = function
                .and_then(|f| f.name.clone())
                .unwrap_or_default();
            self.start_block(
                OpenBlock::ToolUse {
                    backend_index: call.index,
                },
                AnthropicResponseBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
                out,
            );
        }
        if let Some(arguments) = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty())
        {
            self.emitted_bytes += arguments.len();
            out.push(AnthropicStreamEvent::ContentBlockDelta {
                index: self.block_index,
                delta: AnthropicDelta::InputJsonDelta {
                    partial_json: arguments.to_string(),
                },
            });
        }
    }

    fn start_block(
        &mut self,
        kind: OpenBlock,
        content_block: AnthropicResponseBlock,
        out: &mut Vec<AnthropicStreamEvent>,
    ) {
        self.block_index += 1;
        out.push(AnthropicStreamEvent::ContentBlockStart {
            index: self.block_index,
            content_block,
        });
        self.open_block = Some(kind);
    }

    fn close_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.open_block.take().is_some() {
            out.push(AnthropicStreamEvent::ContentBlockStop {
                index: self.block_index,
            });
        }
    }

    fn end_message(&mut self, stop_reason: StopReason, out: &mut Vec<AnthropicStreamEvent>) {
        self.ensure_started(out);
        self.tag_parser.finalize_into(&mut self.segments);
        self.emit_segments(out);
        self.close_block(out);
        out.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDeltaBody {
                stop_reason: Some(stop_reason.as_str().to_string()),
                stop_sequence: None,
            },
            usage: AnthropicDeltaUsage {
                output_tokens: self.usage().output_tokens,
            },
        });
        out.push(AnthropicStreamEvent::MessageStop {});
        self.state = TranslatorState::Ended;
    }
}
