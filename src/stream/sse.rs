//! Server-sent events on both sides of the gateway: an incremental parser for
//! the backend's `data:` frames and writers for the named frames sent to
//! clients.
use futures_util::Stream;
use memchr::memchr;

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Fields collected for the frame currently being read.
#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: Option<String>,
}

impl PendingFrame {
    fn apply_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            // Leading ':' marks a comment.
            "" => {}
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            "event" => self.event = Some(value.to_owned()),
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        let event = self.event.take();
        if let Some(data) = self.data.take() {
            out.push(SseEvent { event, data });
        }
    }
}

// ---------------------------------------------------------------------------
// Incremental parser
// ---------------------------------------------------------------------------

/// Incremental SSE parser.
///
/// Text may arrive split at any character boundary. Only the unterminated
/// tail line is carried between calls.
#[derive(Debug, Default)]
pub struct SseParser {
    partial_line: String,
    frame: PendingFrame,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return the frames it completes.
    ///
    /// Multiple `data:` lines in one frame are joined with `\n`; one space
    /// after the colon is stripped; comments and unknown fields are ignored.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Like [`feed`](Self::feed), appending to a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        let mut rest = chunk;
        while let Some(newline) = memchr(b'\n', rest.as_bytes()) {
            let (head, tail) = rest.split_at(newline);
            rest = &tail[1..];
            if self.partial_line.is_empty() {
                self.frame.apply_line(strip_cr(head), out);
            } else {
                self.partial_line.push_str(head);
                let line = std::mem::take(&mut self.partial_line);
                self.frame.apply_line(strip_cr(&line), out);
            }
        }
        self.partial_line.push_str(rest);
    }

    /// Flush a trailing frame the backend did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let mut out = Vec::with_capacity(1);
        let line = std::mem::take(&mut self.partial_line);
        self.frame.apply_line(strip_cr(&line), &mut out);
        self.frame.dispatch(&mut out);
        out.pop()
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Check if an [`SseEvent`] is the terminal `[DONE]` event.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}

/// The `[DONE]` frame as SSE text.
#[must_use]
pub fn done_frame() -> &'static str {
    DONE_FRAME
}

/// Format a named-event SSE frame.
#[must_use]
pub fn anthropic_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    anthropic_sse_frame_into(&mut out, event_type, json);
    out
}

pub(crate) fn anthropic_sse_frame_into(out: &mut String, event_type: &str, json: &str) {
    out.reserve(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Split a byte stream into SSE events using [`SseParser`].
///
/// Bytes are decoded as UTF-8; an incomplete multi-byte sequence at the end
/// of a read is carried into the next one. A transport error is yielded once
/// and ends the stream.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;
    use std::collections::VecDeque;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        parser: SseParser,
        remainder: Vec<u8>,
        pending: VecDeque<SseEvent>,
        parsed: Vec<SseEvent>,
        done: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        pending: VecDeque::with_capacity(8),
        parsed: Vec::with_capacity(8),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            let next = state.stream.as_mut().next().await;
            match next {
                Some(Ok(bytes)) => {
                    state.remainder.extend_from_slice(&bytes);
                    feed_utf8(&mut state.parser, &mut state.remainder, &mut state.parsed);
                    state.pending.extend(state.parsed.drain(..));
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    if !state.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&state.remainder).into_owned();
                        state.remainder.clear();
                        state.parser.feed_into(&tail, &mut state.parsed);
                        state.pending.extend(state.parsed.drain(..));
                    }
                    if let Some(event) = state.parser.finish() {
                        state.pending.push_back(event);
                    }
                }
            }
        }
    })
}

/// Feed the longest valid UTF-8 prefix of `remainder`, keeping an incomplete
/// trailing sequence for the next read. Invalid bytes become U+FFFD.
fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, out: &mut Vec<SseEvent>) {
    loop {
        match std::str::from_utf8(remainder) {
            Ok(text) => {
                parser.feed_into(text, out);
                remainder.clear();
                return;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&remainder[..valid_up_to]) {
                    parser.feed_into(text, out);
                }
                match err.error_len() {
                    None => {
                        remainder.drain(..valid_up_to);
                        return;
                    }
                    Some(invalid) => {
                        parser.feed_into("\u{FFFD}", out);
                        remainder.drain(..valid_up_to + invalid);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
