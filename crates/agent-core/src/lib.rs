//! # agent-core
//!
//! Iterative tool-calling orchestration: the engine that drives a
//! multi-turn exchange with a generation backend able to call tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                             │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────────────┐  │
//! │  │   State    │   │   extract    │   │  LlmProvider           │  │
//! │  │  machine   │───│ text / calls │───│  (RetryingTransport)   │  │
//! │  └────────────┘   └──────────────┘   └────────────────────────┘  │
//! │         │                                                        │
//! │  ┌──────────────────────┐   ┌──────────────────────────────────┐ │
//! │  │ coordinator (fan-out)│───│ ToolExecutor (supplied by caller)│ │
//! │  └──────────────────────┘   └──────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend and the tools are both reached through traits, so a run can
//! be driven entirely in memory.

pub mod coordinator;
pub mod error;
pub mod extract;
pub mod history;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod state;
pub mod tool;
pub mod transport;

pub use error::{AgentError, Result};
pub use history::{IterationRecord, OrchestrationResult};
pub use message::{ContentBlock, Conversation, ConversationTurn, Role};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorConfig};
pub use provider::{CompletionRequest, GenerationOptions, LlmProvider};
pub use tool::{Tool, ToolCall, ToolExecutionOutcome, ToolExecutor, ToolRegistry, ToolSchema};
pub use transport::{RequestSender, RetryPolicy, RetryingTransport};
