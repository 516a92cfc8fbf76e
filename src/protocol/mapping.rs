use super::anthropic::AnthropicUsage;
use super::openai_chat::OpenAiUsage;

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

/// Backend role for an inbound message role; `None` for roles the Messages
/// protocol does not allow inside `messages`.
#[must_use]
pub fn anthropic_role_to_openai(role: &str) -> Option<&'static str> {
    match role {
        "user" => Some("user"),
        "assistant" => Some("assistant"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

/// Inbound stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ToolUse => "tool_use",
        }
    }
}

/// Total mapping from a backend `finish_reason`; anything unrecognised ends
/// the turn.
#[must_use]
pub fn openai_finish_to_stop_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason.unwrap_or_default() {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        // stop, content_filter, empty, unknown
        _ => StopReason::EndTurn,
    }
}

// ---------------------------------------------------------------------------
// Usage mappings
// ---------------------------------------------------------------------------

/// Copy backend usage 1:1; absent usage reads as zero.
#[must_use]
pub fn openai_usage_to_anthropic(usage: Option<&OpenAiUsage>) -> AnthropicUsage {
    usage.map_or_else(AnthropicUsage::default, |usage| AnthropicUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        assert_eq!(anthropic_role_to_openai("user"), Some("user"));
        assert_eq!(anthropic_role_to_openai("assistant"), Some("assistant"));
        assert_eq!(anthropic_role_to_openai("system"), None);
        assert_eq!(anthropic_role_to_openai("tool"), None);
    }

    #[test]
    fn test_finish_reason_table_is_total() {
        let cases = [
            (Some("stop"), "end_turn"),
            (Some("content_filter"), "end_turn"),
            (Some(""), "end_turn"),
            (Some("something_new"), "end_turn"),
            (None, "end_turn"),
            (Some("length"), "max_tokens"),
            (Some("tool_calls"), "tool_use"),
            (Some("function_call"), "tool_use"),
        ];
        for (finish, expected) in cases {
            assert_eq!(
                openai_finish_to_stop_reason(finish).as_str(),
                expected,
                "{finish:?}"
            );
        }
    }

    #[test]
    fn test_usage_copied_one_to_one() {
        let usage = OpenAiUsage {
            prompt_tokens: 12,
            completion_tokens: 34,
            total_tokens: 46,
        };
        assert_eq!(
            openai_usage_to_anthropic(Some(&usage)),
            AnthropicUsage {
                input_tokens: 12,
                output_tokens: 34,
            }
        );
        assert_eq!(openai_usage_to_anthropic(None), AnthropicUsage::default());
    }
}
