//! Tool Execution Coordinator
//!
//! Runs one batch of tool calls concurrently and turns the outcomes into the
//! assistant/user turn pair that goes back to the model.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;

use crate::message::{ContentBlock, ConversationTurn, Role};
use crate::tool::{ToolCall, ToolExecutionOutcome, ToolExecutor};

/// Everything produced by one executed batch
#[derive(Clone, Debug)]
pub struct ToolBatch {
    /// One outcome per call, in call order
    pub outcomes: Vec<ToolExecutionOutcome>,

    /// `tool_use` blocks for every call, in call order
    pub assistant_turn: ConversationTurn,

    /// `tool_result` blocks keyed by call id, same order
    pub user_turn: ConversationTurn,
}

/// Execute `calls` concurrently against `executor` and wait for all of them.
///
/// A failing (or panicking) call becomes a failed outcome; it never cancels
/// or aborts its siblings.
pub async fn execute_batch(calls: Vec<ToolCall>, executor: &dyn ToolExecutor) -> ToolBatch {
    tracing::info!(count = calls.len(), "Dispatching tool batch");

    let pending = calls.into_iter().map(|call| async move {
        let started = Instant::now();
        let settled = AssertUnwindSafe(executor.execute(&call.name, &call.input))
            .catch_unwind()
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match settled {
            Ok(Ok(value)) => {
                tracing::debug!(tool = %call.name, id = %call.id, elapsed_ms, "Tool succeeded");
                ToolExecutionOutcome::success(call, value)
            }
            Ok(Err(err)) => {
                tracing::warn!(tool = %call.name, id = %call.id, elapsed_ms, error = %err, "Tool failed");
                ToolExecutionOutcome::failure(call, err.detail())
            }
            Err(_) => {
                tracing::error!(tool = %call.name, id = %call.id, elapsed_ms, "Tool panicked");
                ToolExecutionOutcome::failure(call, "tool panicked")
            }
        }
    });

    let outcomes = join_all(pending).await;
    let assistant_turn = ConversationTurn::new(
        Role::Assistant,
        outcomes.iter().map(|o| ContentBlock::tool_use(&o.call)).collect(),
    );
    let user_turn = ConversationTurn::new(
        Role::User,
        outcomes
            .iter()
            .map(|o| ContentBlock::tool_result(o.call.id.clone(), o.result_text()))
            .collect(),
    );

    ToolBatch {
        outcomes,
        assistant_turn,
        user_turn,
    }
}
