//! Generation Backend Abstraction
//!
//! The orchestrator talks to the backend exclusively through [`LlmProvider`].
//! Responses come back as raw JSON because their shape varies between
//! backends; the `extract` module makes sense of them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{CompletionRequest, LlmProvider};
//!
//! let response = provider.complete(&request).await?;
//! let text = agent_core::extract::extract_text(&response);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::ConversationTurn;
use crate::tool::ToolSchema;

/// Model selection and sampling parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier, passed through to the backend untouched
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// System prompt sent alongside the turns
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20240620".into()
}
const fn default_temperature() -> f32 {
    0.2
}
const fn default_max_tokens() -> u32 {
    4096
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

/// Request body for the generation endpoint
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub messages: Vec<ConversationTurn>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,

    /// Offered tools; `None` disables tool use for this request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ConversationTurn>, options: &GenerationOptions) -> Self {
        Self {
            messages,
            model: options.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools: None,
            system: options.system_prompt.clone(),
        }
    }

    /// Offer `tools`; an empty list offers nothing
    #[must_use]
    pub fn with_tools(mut self, tools: &[ToolSchema]) -> Self {
        self.tools = (!tools.is_empty()).then(|| tools.to_vec());
        self
    }
}

/// Strategy trait for generation backends
///
/// Implement this to plug in a new backend. Retries, timeouts and auth are
/// the implementation's business; the orchestrator only sees the outcome.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one request and return the raw response payload
    async fn complete(&self, request: &CompletionRequest) -> Result<Value>;
}
