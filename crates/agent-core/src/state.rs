//! Orchestration State Machine
//!
//! ```text
//! REQUEST → EXTRACT ─┬─ calls ──────────→ EXECUTE → APPEND → REQUEST
//!                    ├─ truncated ──────→ RECOVER → REQUEST
//!                    ├─ usable text ────→ DONE
//!                    ├─ early, no text ─→ (directive) → REQUEST
//!                    └─ stalled ────────→ BUDGET_EXHAUSTED → SUMMARIZE → DONE
//! ```
//!
//! [`next_transition`] decides the edge out of `EXTRACT` from the run's
//! counters and the latest response. It performs no I/O; the loop in
//! [`crate::orchestrator`] carries out whatever it returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{extract_text, extract_tool_calls, truncated_at_tool_marker};
use crate::tool::ToolCall;

/// Thresholds behind the "is this response final" decision
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopHeuristics {
    /// Text longer than this (in chars) is accepted as the final answer
    #[serde(default = "default_final_text_min_chars")]
    pub final_text_min_chars: usize,

    /// Up to this iteration a short answer gets a directive to choose
    #[serde(default = "default_directive_max_iteration")]
    pub directive_max_iteration: u32,

    /// After this iteration a short answer with tool history is summarized
    #[serde(default = "default_summarize_after_iteration")]
    pub summarize_after_iteration: u32,
}

const fn default_final_text_min_chars() -> usize {
    20
}
const fn default_directive_max_iteration() -> u32 {
    2
}
const fn default_summarize_after_iteration() -> u32 {
    3
}

impl Default for LoopHeuristics {
    fn default() -> Self {
        Self {
            final_text_min_chars: default_final_text_min_chars(),
            directive_max_iteration: default_directive_max_iteration(),
            summarize_after_iteration: default_summarize_after_iteration(),
        }
    }
}

/// Counters of one run, as seen at `EXTRACT`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunState {
    /// Current iteration, starting at 1
    pub iteration: u32,

    /// Tool calls executed so far
    pub total_tool_calls: usize,

    /// Tool call budget for the run
    pub max_tool_calls: usize,

    /// Iterations that executed tools
    pub history_len: usize,
}

impl RunState {
    pub const fn remaining_budget(&self) -> usize {
        self.max_tool_calls.saturating_sub(self.total_tool_calls)
    }
}

/// Edge out of `EXTRACT`
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// Run these calls (already trimmed to the remaining budget)
    Execute(Vec<ToolCall>),

    /// Output was cut at a tool-call marker; re-prompt for a proper block
    Recover { partial_text: String },

    /// Early iteration with no usable output; ask the model to choose
    Redirect { partial_text: String },

    /// Final answer
    Finish(String),

    /// Stop iterating and ask for a tool-free summary
    Summarize,
}

/// Number of requests a run may make: `ceil(max_tool_calls / nominal_batch_size)`
pub const fn iteration_cap(max_tool_calls: usize, nominal_batch_size: usize) -> usize {
    if nominal_batch_size == 0 {
        return max_tool_calls;
    }
    max_tool_calls.div_ceil(nominal_batch_size)
}

/// Decide what to do with `response`.
pub fn next_transition(state: &RunState, response: &Value, rules: &LoopHeuristics) -> Transition {
    if let Some(mut calls) = extract_tool_calls(response) {
        let remaining = state.remaining_budget();
        if remaining == 0 {
            return Transition::Summarize;
        }
        if calls.len() > remaining {
            tracing::info!(
                requested = calls.len(),
                remaining,
                "Trimming tool batch to remaining budget"
            );
            calls.truncate(remaining);
        }
        return Transition::Execute(calls);
    }

    let text = extract_text(response);

    if truncated_at_tool_marker(response) {
        return Transition::Recover { partial_text: text };
    }

    if text.chars().count() > rules.final_text_min_chars {
        return Transition::Finish(text);
    }

    if state.iteration <= rules.directive_max_iteration {
        return Transition::Redirect { partial_text: text };
    }

    if state.history_len > 0 && state.iteration > rules.summarize_after_iteration {
        return Transition::Summarize;
    }

    Transition::Finish(text)
}
