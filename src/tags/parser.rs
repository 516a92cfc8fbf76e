//! Incremental, chunk-boundary tolerant parser for inline control markup.
//!
//! Text is fed in arbitrary pieces. Output is withheld while the buffer tail
//! could still grow into a known literal, so a tag split across chunks is
//! never leaked as text. Tags nest; an end tag closes the nearest open tag of
//! its own family, and the content of the outermost tag is interpreted once
//! the stack empties.
//!
//! Invariants:
//! - Feeding a text whole or split at any char boundaries yields the same
//!   segments once adjacent `Text` segments are coalesced.
//! - With no partial match pending the buffer is fully consumed.
//! - `clean_content` is idempotent.
use memchr::{memchr, memmem, memrchr};
use smallvec::SmallVec;

use super::tool_call::{extract_tool_calls, ParsedToolCall};
use super::{TagFamily, TagKind, TagRole, TagSegment, KNOWN_TAGS, LONGEST_TAG_LEN};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A buffer tail that is a strict prefix of a known literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialTag {
    pub literal: &'static str,
    pub matched: usize,
}

#[derive(Debug, Clone, Copy)]
struct OpenTag {
    family: TagFamily,
    start_offset: usize,
}

/// One-shot parse result for a complete text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMarkup {
    pub thoughts: Vec<String>,
    pub tool_calls: Vec<ParsedToolCall>,
    /// Text outside tags, one entry per run between tags, in order.
    pub raw_content: Vec<String>,
}

/// Per-message tag parser state.
#[derive(Debug, Default)]
pub struct TagParser {
    buffer: String,
    stack: SmallVec<[OpenTag; 4]>,
    tag_content: String,
    partial: Option<PartialTag>,
    consumed: usize,
}

// ---------------------------------------------------------------------------
// Streaming API
// ---------------------------------------------------------------------------

impl TagParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the segments it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<TagSegment> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed a chunk and append completed segments into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<TagSegment>) {
        self.buffer.push_str(chunk);
        self.partial = trailing_partial_tag(&self.buffer);
        if self.partial.is_some() {
            return;
        }
        self.drain_buffer(out);
    }

    /// Flush everything still held and reset for reuse.
    ///
    /// A withheld partial literal is emitted as plain text; tags left open are
    /// interpreted by the kind of the outermost one.
    pub fn finalize(&mut self) -> Vec<TagSegment> {
        let mut out = Vec::new();
        self.finalize_into(&mut out);
        out
    }

    pub fn finalize_into(&mut self, out: &mut Vec<TagSegment>) {
        self.partial = None;
        self.drain_buffer(out);
        if let Some(outermost) = self.stack.first().copied() {
            tracing::debug!(
                start_offset = outermost.start_offset,
                open_tags = self.stack.len(),
                "unterminated tag at end of input"
            );
            let content = std::mem::take(&mut self.tag_content);
            interpret_into(outermost.family.kind(), content, out);
        }
        self.reset();
    }

    /// Drop all state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stack.clear();
        self.tag_content.clear();
        self.partial = None;
        self.consumed = 0;
    }

    #[must_use]
    pub fn partial_match(&self) -> Option<PartialTag> {
        self.partial
    }

    /// Number of currently open tags.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Bytes currently withheld in the input buffer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Parse a complete text in one pass.
    #[must_use]
    pub fn parse_complete(text: &str) -> ParsedMarkup {
        let mut parser = Self::new();
        let mut segments = parser.feed(text);
        parser.finalize_into(&mut segments);

        let mut parsed = ParsedMarkup::default();
        for segment in segments {
            match segment {
                TagSegment::Text(text) => parsed.raw_content.push(text),
                TagSegment::Thought(thought) => parsed.thoughts.push(thought),
                TagSegment::ToolCall(call) => parsed.tool_calls.push(call),
            }
        }
        parsed
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn drain_buffer(&mut self, out: &mut Vec<TagSegment>) {
        if self.buffer.is_empty() {
            return;
        }
        let buffer = std::mem::take(&mut self.buffer);
        let matches = find_tag_matches(&buffer);

        let mut cursor = 0;
        for (pos, tag_index) in matches {
            if pos < cursor {
                continue;
            }
            let tag = &KNOWN_TAGS[tag_index];
            let preceding = &buffer[cursor..pos];
            match tag.role {
                TagRole::Start(family) => {
                    if self.stack.is_empty() {
                        push_text(out, preceding);
                    } else {
                        self.tag_content.push_str(preceding);
                        self.tag_content.push_str(tag.literal);
                    }
                    self.stack.push(OpenTag {
                        family,
                        start_offset: self.consumed + pos,
                    });
                }
                TagRole::End(family) => self.close_tag(family, tag.literal, preceding, out),
                TagRole::Separator => {}
            }
            cursor = pos + tag.literal.len();
        }

        let rest = &buffer[cursor..];
        if self.stack.is_empty() {
            push_text(out, rest);
        } else {
            self.tag_content.push_str(rest);
        }
        self.consumed += buffer.len();

        // Reuse the allocation unless a pathological chunk inflated it.
        let mut buffer = buffer;
        buffer.clear();
        if buffer.capacity() <= LONGEST_TAG_LEN * 64 {
            self.buffer = buffer;
        }
    }

    fn close_tag(
        &mut self,
        family: TagFamily,
        literal: &'static str,
        preceding: &str,
        out: &mut Vec<TagSegment>,
    ) {
        let Some(at) = self.stack.iter().rposition(|open| open.family == family) else {
            if self.stack.is_empty() {
                // Stray end tag: keep the text, drop the marker.
                push_text(out, preceding);
            } else {
                self.tag_content.push_str(preceding);
                self.tag_content.push_str(literal);
            }
            return;
        };

        self.tag_content.push_str(preceding);
        // Tags opened after the matched one are closed implicitly.
        self.stack.truncate(at);
        if self.stack.is_empty() {
            let content = std::mem::take(&mut self.tag_content);
            interpret_into(family.kind(), content, out);
        } else {
            self.tag_content.push_str(literal);
        }
    }
}

fn push_text(out: &mut Vec<TagSegment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(TagSegment::Text(last)) = out.last_mut() {
        last.push_str(text);
    } else {
        out.push(TagSegment::Text(text.to_string()));
    }
}

fn interpret_into(kind: TagKind, content: String, out: &mut Vec<TagSegment>) {
    match kind {
        TagKind::Thinking => out.push(TagSegment::Thought(content)),
        TagKind::ToolReasoning => {
            out.extend(
                extract_tool_calls(&content)
                    .into_iter()
                    .map(TagSegment::ToolCall),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Detect a buffer tail that is a strict prefix of a known literal.
///
/// When several literals fit, the longest one is reported.
///
/// Every literal starts with its only `'<'`, so the candidate tail always
/// begins at the last `'<'` in the buffer.
fn trailing_partial_tag(buffer: &str) -> Option<PartialTag> {
    let bytes = buffer.as_bytes();
    let start = memrchr(b'<', bytes)?;
    let tail = &buffer[start..];
    if tail.len() >= LONGEST_TAG_LEN {
        return None;
    }
    KNOWN_TAGS
        .iter()
        .filter(|tag| tag.literal.len() > tail.len() && tag.literal.starts_with(tail))
        .max_by_key(|tag| tag.literal.len())
        .map(|tag| PartialTag {
            literal: tag.literal,
            matched: tail.len(),
        })
}

/// All complete start/end literal occurrences, ordered by position and then
/// by table order.
fn find_tag_matches(buffer: &str) -> SmallVec<[(usize, usize); 8]> {
    let mut matches = SmallVec::new();
    let bytes = buffer.as_bytes();
    if memchr(b'<', bytes).is_none() {
        return matches;
    }
    for (index, tag) in KNOWN_TAGS.iter().enumerate() {
        if matches!(tag.role, TagRole::Separator) {
            continue;
        }
        for pos in memmem::find_iter(bytes, tag.literal.as_bytes()) {
            matches.push((pos, index));
        }
    }
    matches.sort_unstable();
    matches
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Remove every known literal, repeating until none remain.
#[must_use]
pub fn clean_content(text: &str) -> String {
    strip_literals(text, |_| true)
}

pub(crate) fn strip_literals(text: &str, should_strip: impl Fn(TagRole) -> bool) -> String {
    let mut current = text.to_string();
    loop {
        let mut changed = false;
        for tag in KNOWN_TAGS {
            if !should_strip(tag.role) {
                continue;
            }
            if memmem::find(current.as_bytes(), tag.literal.as_bytes()).is_some() {
                current = current.replace(tag.literal, "");
                changed = true;
            }
        }
        if !changed {
            return current;
        }
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
