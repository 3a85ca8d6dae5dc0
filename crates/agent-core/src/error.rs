//! Error Types

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Orchestration error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Backend answered with a non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure before a status was received
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Backend returned something unusable
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool not known to the executor
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Parse error (e.g., tool call parsing)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tool-free summary request failed or came back without text
    #[error("Summary failed: {0}")]
    SummaryFailed(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Transient failures worth another attempt: network, timeout, 5xx.
    /// 4xx means a bad request or bad credentials and is never retried.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Io(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The bare message, without the variant prefix. Used for tool results.
    pub fn detail(&self) -> String {
        match self {
            Self::ToolExecution(msg) | Self::Provider(msg) | Self::Other(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { status, .. } if *status == 401 || *status == 403 => {
                "Authentication with the AI service failed. Please check your credentials.".into()
            }
            Self::Http { status, .. } if *status >= 500 => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::Http { status, .. } => format!("The AI service rejected the request (HTTP {status})."),
            Self::Network(_) | Self::Timeout(_) => {
                "Could not reach the AI service. Please try again.".into()
            }
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::Config(msg) => format!("Configuration problem: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
