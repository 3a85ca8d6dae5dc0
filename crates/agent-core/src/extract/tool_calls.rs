//! Tool call extraction.
//!
//! Models emit tool calls in one of three shapes. Each shape has its own
//! pure parser; [`extract_tool_calls`] tries them in priority order and the
//! first one that yields calls wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::content::extract_text;
use crate::tool::{ToolCall, generate_call_id, is_valid_call_id};

const TOOL_CALLS_KEY: &str = "\"tool_calls\"";
const FUNCTION_CALLS_OPEN: &str = "<function_calls>";
const FUNCTION_CALLS_CLOSE: &str = "</function_calls>";
const FUNCTION_RESULT_OPEN: &str = "<function_result";

static INVOKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<invoke\s+name\s*=\s*"([^"]+)"\s*>(.*?)</invoke>"#).expect("invoke pattern")
});

static PARAMETER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<parameter\s+name\s*=\s*"([^"]+)"\s*>(.*?)</parameter>"#)
        .expect("parameter pattern")
});

static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("integer pattern"));

/// Tool call encodings, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolCallFormat {
    /// `{"tool_calls": [{"name": ..., "parameters": {...}}]}` anywhere in the text
    EmbeddedJson,
    /// `<function_calls><invoke name="..."><parameter name="...">` markup
    LegacyMarkup,
    /// Top-level `content` array of `tool_use` blocks
    ContentArray,
}

impl ToolCallFormat {
    pub const PRIORITY: [Self; 3] = [Self::EmbeddedJson, Self::LegacyMarkup, Self::ContentArray];

    /// Parse `response` (whose extracted text is `text`) in this format
    pub fn parse(self, response: &Value, text: &str) -> Option<Vec<ToolCall>> {
        match self {
            Self::EmbeddedJson => parse_embedded_json(text),
            Self::LegacyMarkup => parse_legacy_markup(text),
            Self::ContentArray => parse_content_array(response),
        }
    }
}

/// Tool calls in `response`, or `None` when the model asked for no tools.
pub fn extract_tool_calls(response: &Value) -> Option<Vec<ToolCall>> {
    let text = extract_text(response);
    ToolCallFormat::PRIORITY.iter().find_map(|format| {
        let calls = format.parse(response, &text)?;
        tracing::debug!(?format, count = calls.len(), "Extracted tool calls");
        Some(calls)
    })
}

/// Locate a JSON object containing a `"tool_calls"` key inside free text.
///
/// Every occurrence of the key is tried. For each one, every `{` before it is
/// a candidate start, nearest first; the first candidate whose balanced object
/// spans the key and parses with a non-empty `tool_calls` list wins.
pub fn parse_embedded_json(text: &str) -> Option<Vec<ToolCall>> {
    text.match_indices(TOOL_CALLS_KEY).find_map(|(anchor, _)| {
        text[..anchor]
            .rmatch_indices('{')
            .filter_map(|(start, _)| balanced_object(text, start))
            .filter(|candidate| candidate.end > anchor)
            .find_map(|candidate| calls_in_object(&text[candidate]))
    })
}

fn calls_in_object(candidate: &str) -> Option<Vec<ToolCall>> {
    let parsed: Value = serde_json::from_str(candidate).ok()?;
    let calls: Vec<ToolCall> = parsed
        .get("tool_calls")?
        .as_array()?
        .iter()
        .filter_map(json_call)
        .collect();
    (!calls.is_empty()).then_some(calls)
}

fn json_call(entry: &Value) -> Option<ToolCall> {
    let name = entry.get("name")?.as_str()?;
    let input = entry
        .get("parameters")
        .or_else(|| entry.get("arguments"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Some(ToolCall::new(name, input))
}

/// Byte range from the `{` at `start` through its matching `}`, skipping
/// braces inside string literals.
fn balanced_object(text: &str, start: usize) -> Option<std::ops::Range<usize>> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start..start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the `<function_calls>` block. Anything after the block, including a
/// hallucinated `<function_result>`, is ignored.
pub fn parse_legacy_markup(text: &str) -> Option<Vec<ToolCall>> {
    let open = text.find(FUNCTION_CALLS_OPEN)?;
    let body = &text[open + FUNCTION_CALLS_OPEN.len()..];
    let end = [FUNCTION_CALLS_CLOSE, FUNCTION_RESULT_OPEN]
        .iter()
        .filter_map(|marker| body.find(marker))
        .min()
        .unwrap_or(body.len());
    let block = &body[..end];

    let calls: Vec<ToolCall> = INVOKE_RE
        .captures_iter(block)
        .map(|invoke| {
            let input = PARAMETER_RE
                .captures_iter(&invoke[2])
                .map(|param| (param[1].to_string(), markup_value(&param[2])))
                .collect::<Map<_, _>>();
            ToolCall::new(&invoke[1], input)
        })
        .collect();

    (!calls.is_empty()).then_some(calls)
}

/// Digit-only values become integers; everything else stays a string.
fn markup_value(raw: &str) -> Value {
    let raw = raw.trim();
    if INTEGER_RE.is_match(raw) {
        if let Ok(n) = raw.parse::<u64>() {
            return Value::from(n);
        }
    }
    Value::String(raw.to_string())
}

/// Structured `tool_use` blocks; ids supplied by the backend are kept.
pub fn parse_content_array(response: &Value) -> Option<Vec<ToolCall>> {
    let calls: Vec<ToolCall> = response
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|block| {
            let name = block.get("name")?.as_str()?;
            let id = block
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| is_valid_call_id(id))
                .map_or_else(generate_call_id, str::to_string);
            let input = block
                .get("input")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Some(ToolCall::with_id(id, name, input))
        })
        .collect();

    (!calls.is_empty()).then_some(calls)
}
