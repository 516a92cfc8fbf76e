//! Best-effort recovery of tool invocations from tool-reasoning markup.
//!
//! Extraction never fails: each strategy is tried in order and the last one
//! always produces a call.
use memchr::memmem;
use serde_json::Value;

use super::parser::{clean_content, strip_literals};
use super::{
    TagRole, BARE_TOOL_CALL_END, BARE_TOOL_CALL_START, TOOL_CALL_BEGIN, TOOL_CALL_END, TOOL_SEP,
};

const EMPTY_ARGUMENTS: &str = "{}";
const CODE_FENCE: &str = "```";

/// A tool call recovered from markup. `arguments` is raw JSON text as the
/// model wrote it and is not guaranteed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: String,
}

impl ParsedToolCall {
    /// Compact `name(arguments)` rendering used where only text can be sent.
    #[must_use]
    pub fn render_inline(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + self.arguments.len() + 2);
        out.push_str(&self.name);
        out.push('(');
        out.push_str(&self.arguments);
        out.push(')');
        out
    }
}

/// Extract every tool call from the content of a closed tool-reasoning tag.
///
/// Content holding nested per-call blocks yields one call per block;
/// otherwise the whole content is one call. Blank content yields nothing.
#[must_use]
pub fn extract_tool_calls(content: &str) -> Vec<ParsedToolCall> {
    let blocks = split_call_blocks(content);
    if blocks.is_empty() {
        if clean_content(content).trim().is_empty() {
            return Vec::new();
        }
        return vec![parse_tool_call(content)];
    }
    blocks
        .into_iter()
        .filter(|block| !clean_content(block).trim().is_empty())
        .map(parse_tool_call)
        .collect()
}

/// Parse one call body.
///
/// Order: JSON object, separator split, function-dispatch with a fenced JSON
/// block, first colon, whole content as the name.
#[must_use]
pub fn parse_tool_call(raw: &str) -> ParsedToolCall {
    let stripped = strip_literals(raw, |role| !matches!(role, TagRole::Separator));
    let text = stripped.trim();

    if let Some(call) = from_json_object(text) {
        return call;
    }

    if let Some((left, right)) = text.split_once(TOOL_SEP) {
        let name = left.trim();
        if name == "function" {
            if let Some(call) = from_function_dispatch(right) {
                return call;
            }
        } else if !name.is_empty() {
            return ParsedToolCall {
                name: name.to_string(),
                arguments: normalize_arguments(right),
            };
        }
    }

    let text = clean_content(text);
    let text = text.trim();
    if let Some((name, arguments)) = text.split_once(':') {
        let name = name.trim();
        if !name.is_empty() {
            return ParsedToolCall {
                name: name.to_string(),
                arguments: normalize_arguments(arguments),
            };
        }
    }

    ParsedToolCall {
        name: text.to_string(),
        arguments: EMPTY_ARGUMENTS.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn from_json_object(text: &str) -> Option<ParsedToolCall> {
    if !text.starts_with('{') {
        return None;
    }
    let Value::Object(map) = serde_json::from_str::<Value>(text).ok()? else {
        return None;
    };

    let (name, nested_arguments) = match (map.get("name"), map.get("function")) {
        (Some(Value::String(name)), _) => (name.as_str(), None),
        (_, Some(Value::String(name))) => (name.as_str(), None),
        (_, Some(Value::Object(function))) => match function.get("name") {
            Some(Value::String(name)) => (
                name.as_str(),
                function.get("arguments").or_else(|| function.get("parameters")),
            ),
            _ => return None,
        },
        _ => return None,
    };
    if name.trim().is_empty() {
        return None;
    }

    let arguments = map
        .get("arguments")
        .or_else(|| map.get("parameters"))
        .or(nested_arguments);
    let arguments = match arguments {
        None | Some(Value::Null) => EMPTY_ARGUMENTS.to_string(),
        Some(Value::String(text)) => normalize_arguments(text),
        Some(other) => other.to_string(),
    };

    Some(ParsedToolCall {
        name: name.trim().to_string(),
        arguments,
    })
}

/// `Name` followed by a fenced JSON block. Without a fence the first line
/// is the name and the remainder the arguments.
fn from_function_dispatch(rest: &str) -> Option<ParsedToolCall> {
    let rest = rest.trim_start();
    let Some(fence) = memmem::find(rest.as_bytes(), CODE_FENCE.as_bytes()) else {
        let (name, arguments) = rest.split_once('\n').unwrap_or((rest, ""));
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        return Some(ParsedToolCall {
            name: name.to_string(),
            arguments: normalize_arguments(arguments),
        });
    };

    let name = rest[..fence].trim();
    if name.is_empty() {
        return None;
    }
    let body = fenced_body(&rest[fence + CODE_FENCE.len()..]);
    Some(ParsedToolCall {
        name: name.to_string(),
        arguments: unwrap_json_string(body.trim()),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bodies of nested per-call blocks. An unterminated block runs to the next
/// block start or the end of the content.
fn split_call_blocks(content: &str) -> Vec<&str> {
    const PAIRS: [(&str, &str); 2] = [
        (TOOL_CALL_BEGIN, TOOL_CALL_END),
        (BARE_TOOL_CALL_START, BARE_TOOL_CALL_END),
    ];

    let mut blocks = Vec::new();
    let mut pos = 0;
    loop {
        let next_start = PAIRS
            .iter()
            .filter_map(|&(start, end)| {
                memmem::find(&content.as_bytes()[pos..], start.as_bytes())
                    .map(|rel| (pos + rel, start, end))
            })
            .min_by_key(|&(at, _, _)| at);
        let Some((at, start, end)) = next_start else {
            return blocks;
        };

        let body_start = at + start.len();
        let tail = &content.as_bytes()[body_start..];
        let body_end = memmem::find(tail, end.as_bytes()).map(|rel| body_start + rel);
        let next_block = PAIRS
            .iter()
            .filter_map(|&(other_start, _)| memmem::find(tail, other_start.as_bytes()))
            .min()
            .map(|rel| body_start + rel);

        match (body_end, next_block) {
            (Some(end_at), Some(next_at)) if next_at < end_at => {
                blocks.push(&content[body_start..next_at]);
                pos = next_at;
            }
            (Some(end_at), _) => {
                blocks.push(&content[body_start..end_at]);
                pos = end_at + end.len();
            }
            (None, Some(next_at)) => {
                blocks.push(&content[body_start..next_at]);
                pos = next_at;
            }
            (None, None) => {
                blocks.push(&content[body_start..]);
                return blocks;
            }
        }
    }
}

/// Body of a code fence whose opening backticks were already consumed.
/// A language tag on the opening line is skipped; a missing closing fence
/// takes the rest of the text.
fn fenced_body(after_open: &str) -> &str {
    let body = match after_open.split_once('\n') {
        Some((lang, body)) if lang.trim().chars().all(|c| c.is_ascii_alphanumeric()) => body,
        _ => after_open,
    };
    match memmem::find(body.as_bytes(), CODE_FENCE.as_bytes()) {
        Some(end) => &body[..end],
        None => body,
    }
}

fn normalize_arguments(raw: &str) -> String {
    let cleaned = clean_content(raw);
    let trimmed = cleaned.trim();
    let trimmed = match trimmed.strip_prefix(CODE_FENCE) {
        Some(after_open) => fenced_body(after_open).trim(),
        None => trimmed,
    };
    unwrap_json_string(trimmed)
}

/// A JSON string literal holding the arguments is unwrapped one level.
fn unwrap_json_string(text: &str) -> String {
    if text.is_empty() {
        return EMPTY_ARGUMENTS.to_string();
    }
    if text.starts_with('"') {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(text) {
            let inner = inner.trim();
            return if inner.is_empty() {
                EMPTY_ARGUMENTS.to_string()
            } else {
                inner.to_string()
            };
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: &str = TOOL_SEP;

    #[test]
    fn separator_split_name_and_arguments() {
        let call = parse_tool_call(&format!("get_weather{SEP}{{\"location\":\"SF\"}}"));
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, r#"{"location":"SF"}"#);
    }

    #[test]
    fn json_object_with_arguments_object() {
        let call = parse_tool_call(r#"{"name":"search","arguments":{"q":"rust"}}"#);
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn json_object_with_string_arguments_and_parameters_alias() {
        let call = parse_tool_call(r#"{"function":"lookup","parameters":"{\"id\":7}"}"#);
        assert_eq!(call.name, "lookup");
        assert_eq!(call.arguments, r#"{"id":7}"#);
    }

    #[test]
    fn json_object_with_nested_function_object() {
        let call =
            parse_tool_call(r#"{"type":"function","function":{"name":"f","arguments":{"a":1}}}"#);
        assert_eq!(call.name, "f");
        assert_eq!(call.arguments, r#"{"a":1}"#);
    }

    #[test]
    fn function_dispatch_with_fenced_json() {
        let raw = format!("function{SEP}get_weather\n```json\n{{\"city\":\"Paris\"}}\n```");
        let call = parse_tool_call(&raw);
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, r#"{"city":"Paris"}"#);
    }

    #[test]
    fn function_dispatch_missing_closing_fence_takes_rest() {
        let raw = format!("function{SEP}get_time\n```json\n{{\"tz\":\"UTC\"}}");
        let call = parse_tool_call(&raw);
        assert_eq!(call.name, "get_time");
        assert_eq!(call.arguments, r#"{"tz":"UTC"}"#);
    }

    #[test]
    fn function_dispatch_unwraps_string_json() {
        let raw = format!("function{SEP}echo\n```json\n\"{{\\\"text\\\":\\\"hi\\\"}}\"\n```");
        let call = parse_tool_call(&raw);
        assert_eq!(call.name, "echo");
        assert_eq!(call.arguments, r#"{"text":"hi"}"#);
    }

    #[test]
    fn function_dispatch_without_fence_uses_first_line() {
        let raw = format!("function{SEP}ping\n{{\"n\":1}}");
        let call = parse_tool_call(&raw);
        assert_eq!(call.name, "ping");
        assert_eq!(call.arguments, r#"{"n":1}"#);
    }

    #[test]
    fn colon_split() {
        let call = parse_tool_call("calc: {\"expr\":\"1+1\"}");
        assert_eq!(call.name, "calc");
        assert_eq!(call.arguments, r#"{"expr":"1+1"}"#);
    }

    #[test]
    fn fallback_whole_content_is_name() {
        let call = parse_tool_call("  list_files  ");
        assert_eq!(call.name, "list_files");
        assert_eq!(call.arguments, "{}");
    }

    #[test]
    fn parse_never_fails_on_garbage() {
        for raw in ["", "{", ":::", "```", SEP, "{\"name\":42}"] {
            let _ = parse_tool_call(raw);
        }
    }

    #[test]
    fn extract_splits_nested_call_blocks() {
        let content = format!(
            "{TOOL_CALL_BEGIN}a{SEP}{{}}{TOOL_CALL_END}{TOOL_CALL_BEGIN}b{SEP}{{\"x\":1}}{TOOL_CALL_END}"
        );
        let calls = extract_tool_calls(&content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
        assert_eq!(calls[1].arguments, r#"{"x":1}"#);
    }

    #[test]
    fn extract_unterminated_block_runs_to_next_start() {
        let content =
            format!("{TOOL_CALL_BEGIN}a{SEP}{{}}{TOOL_CALL_BEGIN}b{SEP}{{}}{TOOL_CALL_END}");
        let calls = extract_tool_calls(&content);
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn extract_blank_content_yields_nothing() {
        assert!(extract_tool_calls("  \n ").is_empty());
        assert!(extract_tool_calls(&format!("{TOOL_CALL_BEGIN}{TOOL_CALL_END}")).is_empty());
    }

    #[test]
    fn render_inline() {
        let call = ParsedToolCall {
            name: "f".into(),
            arguments: "{}".into(),
        };
        assert_eq!(call.render_inline(), "f({})");
    }
}
