//! Inline control markup carried inside plain completion text.
//!
//! Some backends stream their reasoning and tool invocations as literal
//! markers (`<think>…</think>`, DeepSeek-style `<｜tool▁call▁begin｜>` blocks,
//! `<tool_call>…</tool_call>`) inside ordinary `content` deltas. This module
//! owns the static literal table and the incremental parser that turns such
//! text back into typed segments.

mod parser;
mod tool_call;

pub use parser::{clean_content, ParsedMarkup, PartialTag, TagParser};
pub use tool_call::{extract_tool_calls, parse_tool_call, ParsedToolCall};

pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";
pub const TOOL_CALLS_BEGIN: &str = "<｜tool▁calls▁begin｜>";
pub const TOOL_CALLS_END: &str = "<｜tool▁calls▁end｜>";
pub const TOOL_CALL_BEGIN: &str = "<｜tool▁call▁begin｜>";
pub const TOOL_CALL_END: &str = "<｜tool▁call▁end｜>";
pub const BARE_TOOL_CALL_START: &str = "<tool_call>";
pub const BARE_TOOL_CALL_END: &str = "</tool_call>";
pub const TOOL_SEP: &str = "<｜tool▁sep｜>";

/// Semantic interpretation applied to the content of a closed outermost tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Thinking,
    ToolReasoning,
}

/// Start/end pairing key. End tags only close an open tag of the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagFamily {
    Think,
    ToolCalls,
    ToolCall,
    BareToolCall,
}

impl TagFamily {
    #[must_use]
    pub(crate) const fn kind(self) -> TagKind {
        match self {
            TagFamily::Think => TagKind::Thinking,
            TagFamily::ToolCalls | TagFamily::ToolCall | TagFamily::BareToolCall => {
                TagKind::ToolReasoning
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagRole {
    Start(TagFamily),
    End(TagFamily),
    /// Recognised for partial-match withholding and cleanup only.
    Separator,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TagDef {
    pub(crate) literal: &'static str,
    pub(crate) role: TagRole,
}

/// Every literal the parser knows. Position in this table breaks ties between
/// matches found at the same offset.
pub(crate) const KNOWN_TAGS: &[TagDef] = &[
    TagDef {
        literal: THINK_START,
        role: TagRole::Start(TagFamily::Think),
    },
    TagDef {
        literal: THINK_END,
        role: TagRole::End(TagFamily::Think),
    },
    TagDef {
        literal: TOOL_CALLS_BEGIN,
        role: TagRole::Start(TagFamily::ToolCalls),
    },
    TagDef {
        literal: TOOL_CALLS_END,
        role: TagRole::End(TagFamily::ToolCalls),
    },
    TagDef {
        literal: TOOL_CALL_BEGIN,
        role: TagRole::Start(TagFamily::ToolCall),
    },
    TagDef {
        literal: TOOL_CALL_END,
        role: TagRole::End(TagFamily::ToolCall),
    },
    TagDef {
        literal: BARE_TOOL_CALL_START,
        role: TagRole::Start(TagFamily::BareToolCall),
    },
    TagDef {
        literal: BARE_TOOL_CALL_END,
        role: TagRole::End(TagFamily::BareToolCall),
    },
    TagDef {
        literal: TOOL_SEP,
        role: TagRole::Separator,
    },
];

const fn longest_literal_len(tags: &[TagDef]) -> usize {
    let mut longest = 0;
    let mut i = 0;
    while i < tags.len() {
        let len = tags[i].literal.len();
        if len > longest {
            longest = len;
        }
        i += 1;
    }
    longest
}

/// Byte length of the longest known literal.
pub const LONGEST_TAG_LEN: usize = longest_literal_len(KNOWN_TAGS);

/// One unit of parser output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSegment {
    /// Plain text outside any tag.
    Text(String),
    /// Verbatim content of a closed thinking tag.
    Thought(String),
    /// A tool invocation recovered from tool-reasoning markup.
    ToolCall(ParsedToolCall),
}
