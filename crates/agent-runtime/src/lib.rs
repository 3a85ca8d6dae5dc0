//! # agent-runtime
//!
//! Concrete backends for agent-core.
//!
//! ## Backends
//!
//! - **HTTP** ([`HttpProvider`]): generation endpoint reached with `reqwest`,
//!   retried through [`agent_core::RetryingTransport`]
//! - **Stdio tool server** ([`StdioToolServer`]): external process speaking
//!   JSON-RPC over stdin/stdout, used as the [`agent_core::ToolExecutor`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{HttpProvider, StdioToolServer};
//!
//! let provider = HttpProvider::from_env()?;
//! let tools = StdioToolServer::spawn("issue-tools", &[], DEFAULT_REQUEST_TIMEOUT).await?;
//! let orchestrator = OrchestratorBuilder::new()
//!     .provider(Arc::new(provider))
//!     .tools(tools.list_tools().await?)
//!     .executor(Arc::new(tools))
//!     .build()?;
//! ```

pub mod http;
pub mod tool_server;

pub use http::{BackendConfig, HttpProvider, HttpSender};
pub use tool_server::{DEFAULT_REQUEST_TIMEOUT, StdioToolServer};

// Re-export core types for convenience
pub use agent_core::{
    AgentError, LlmProvider, Orchestrator, OrchestratorBuilder, Result, ToolExecutor, ToolSchema,
};
