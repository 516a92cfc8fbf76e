pub mod sse;
pub mod translator;

pub use sse::{done_frame, is_done_event, sse_frame_stream, SseEvent, SseParser};
pub use translator::{StreamTranslator, TranslatorState};
