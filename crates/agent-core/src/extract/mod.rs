//! Response Parsing
//!
//! Backends return loosely structured payloads. Everything here is pure and
//! never fails: a shape that is not recognised simply yields nothing.

pub mod content;
pub mod tool_calls;

use serde_json::Value;

pub use content::{TextSource, extract_text};
pub use tool_calls::{ToolCallFormat, extract_tool_calls};

/// Stop sequences that mark the opening of a tool call block.
pub const TOOL_CALL_OPEN_MARKERS: &[&str] = &["<function_calls>", "<invoke", "\"tool_calls\""];

/// Whether the response was cut at a tool-call opening marker.
///
/// Looks at `stop_reason` / `stop_sequence` on the payload and on any
/// provider wrapper around it.
pub fn truncated_at_tool_marker(response: &Value) -> bool {
    std::iter::once(response)
        .chain(
            content::PROVIDER_WRAPPER_KEYS
                .iter()
                .filter_map(|key| response.get(*key)),
        )
        .any(stopped_on_marker)
}

fn stopped_on_marker(value: &Value) -> bool {
    let reason = value.get("stop_reason").and_then(Value::as_str);
    if reason.is_some_and(|r| r != "stop_sequence") {
        return false;
    }
    value
        .get("stop_sequence")
        .and_then(Value::as_str)
        .is_some_and(|seq| TOOL_CALL_OPEN_MARKERS.iter().any(|m| seq.contains(m)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncation_signal() {
        assert!(truncated_at_tool_marker(&json!({
            "content": [{"type": "text", "text": "Let me check."}],
            "stop_reason": "stop_sequence",
            "stop_sequence": "<function_calls>",
        })));
        assert!(truncated_at_tool_marker(&json!({
            "response": {"stop_reason": "stop_sequence", "stop_sequence": "<invoke"},
        })));
        assert!(!truncated_at_tool_marker(&json!({
            "stop_reason": "end_turn",
            "stop_sequence": "<function_calls>",
        })));
        assert!(!truncated_at_tool_marker(&json!({
            "stop_reason": "stop_sequence",
            "stop_sequence": "\n\nHuman:",
        })));
        assert!(!truncated_at_tool_marker(&json!({"stop_reason": "max_tokens"})));
    }
}
