//! Conversation Turns
//!
//! Turn and content-block types exchanged with the generation backend.
//! A turn is never mutated once it has been pushed onto a [`Conversation`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::ToolCall;

/// Role of a turn author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input, including tool results fed back to the model
    User,
    /// Model output
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One block of turn content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },

    /// A tool invocation emitted by the model
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },

    /// The outcome of a tool invocation, keyed by the originating call id
    ToolResult { tool_use_id: String, content: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(call: &ToolCall) -> Self {
        Self::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }
}

/// A single turn in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Turn author
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
}

impl ConversationTurn {
    pub const fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// A user turn holding a single text block
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// An assistant turn holding a single text block
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ids of the tool_use blocks in this turn, in order
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Ids referenced by the tool_result blocks in this turn, in order
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Append-only conversation history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from the user's prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.push(ConversationTurn::user(prompt));
        conv
    }

    /// Add a turn
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Get all turns
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Get the last turn
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Copy of the turns with `instruction` appended as user text.
    ///
    /// Folds into a trailing user turn so roles keep alternating.
    pub fn with_instruction(&self, instruction: &str) -> Vec<ConversationTurn> {
        let mut turns = self.turns.clone();
        match turns.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push(ContentBlock::text(instruction));
            }
            _ => turns.push(ConversationTurn::user(instruction)),
        }
        turns
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_wire_shape() {
        let block = ContentBlock::tool_result("tool_1", "ok");
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "tool_result", "tool_use_id": "tool_1", "content": "ok"})
        );

        let turn = ConversationTurn::assistant("hi");
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            json!({"role": "assistant", "content": [{"type": "text", "text": "hi"}]})
        );
    }

    #[test]
    fn test_instruction_folds_into_trailing_user_turn() {
        let mut conv = Conversation::from_prompt("question");
        let turns = conv.with_instruction("summarize");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text(), "question\nsummarize");

        conv.push(ConversationTurn::assistant("partial"));
        let turns = conv.with_instruction("summarize");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].role, Role::User);
        // the conversation itself is untouched
        assert_eq!(conv.len(), 2);
    }
}
