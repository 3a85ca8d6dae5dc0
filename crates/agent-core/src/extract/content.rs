//! Plain-text extraction from backend responses.

use serde_json::Value;

/// Wrapper keys some providers nest the message under.
pub const PROVIDER_WRAPPER_KEYS: &[&str] = &["response", "data"];

/// Places a response may keep its text, in the order they are checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextSource {
    /// `{"response": {"content": [{"text": ...}]}}`
    ProviderWrapper,
    /// `{"content": [{"text": ...}]}`
    TopLevel,
    /// `{"body": {"content": [{"text": ...}]}}`, body may be a JSON string
    Body,
    /// The payload is itself a string
    RawString,
}

impl TextSource {
    pub const PRIORITY: [Self; 4] = [
        Self::ProviderWrapper,
        Self::TopLevel,
        Self::Body,
        Self::RawString,
    ];

    pub fn extract(self, response: &Value) -> Option<String> {
        match self {
            Self::ProviderWrapper => PROVIDER_WRAPPER_KEYS
                .iter()
                .filter_map(|key| response.get(*key))
                .find_map(first_block_text),
            Self::TopLevel => first_block_text(response),
            Self::Body => match response.get("body")? {
                Value::String(raw) => serde_json::from_str::<Value>(raw)
                    .ok()
                    .as_ref()
                    .and_then(first_block_text),
                body => first_block_text(body),
            },
            Self::RawString => response.as_str().map(str::to_string),
        }
    }
}

/// Best-effort text of a response. Empty when nothing matches.
pub fn extract_text(response: &Value) -> String {
    TextSource::PRIORITY
        .iter()
        .find_map(|source| source.extract(response))
        .unwrap_or_default()
}

fn first_block_text(value: &Value) -> Option<String> {
    value
        .get("content")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrapper_wins_over_top_level() {
        let response = json!({
            "response": {"content": [{"type": "text", "text": "wrapped"}]},
            "content": [{"type": "text", "text": "top"}],
        });
        assert_eq!(extract_text(&response), "wrapped");
    }

    #[test]
    fn test_each_shape() {
        assert_eq!(
            extract_text(&json!({"content": [{"type": "text", "text": "top"}]})),
            "top"
        );
        assert_eq!(
            extract_text(&json!({"body": {"content": [{"text": "in body"}]}})),
            "in body"
        );
        assert_eq!(
            extract_text(&json!({"body": r#"{"content":[{"text":"encoded"}]}"#})),
            "encoded"
        );
        assert_eq!(extract_text(&json!("already text")), "already text");
    }

    #[test]
    fn test_unmatched_shapes_are_empty() {
        assert_eq!(extract_text(&json!({})), "");
        assert_eq!(extract_text(&json!({"content": []})), "");
        assert_eq!(
            extract_text(&json!({"content": [{"type": "tool_use", "id": "t"}]})),
            ""
        );
        assert_eq!(extract_text(&json!({"body": "not json"})), "");
        assert_eq!(extract_text(&Value::Null), "");
    }
}
