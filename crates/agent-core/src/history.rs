//! Run history and the final result handed back to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::{ToolCall, ToolExecutionOutcome, ToolOutput};

/// Per-call entry of an [`IterationRecord`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSummary {
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ToolExecutionOutcome> for ToolCallSummary {
    fn from(outcome: &ToolExecutionOutcome) -> Self {
        let (result, error) = match &outcome.output {
            ToolOutput::Success(value) => (Some(value.clone()), None),
            ToolOutput::Failure(message) => (None, Some(message.clone())),
        };
        Self {
            tool_name: outcome.call.name.clone(),
            success: outcome.is_success(),
            result,
            error,
        }
    }
}

/// One iteration that executed tools
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    /// Iteration number, starting at 1
    pub iteration: u32,
    pub tool_calls: Vec<ToolCall>,
    pub results: Vec<ToolCallSummary>,
}

impl IterationRecord {
    pub fn from_outcomes(iteration: u32, outcomes: &[ToolExecutionOutcome]) -> Self {
        Self {
            iteration,
            tool_calls: outcomes.iter().map(|o| o.call.clone()).collect(),
            results: outcomes.iter().map(ToolCallSummary::from).collect(),
        }
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Output of one orchestration run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub final_content: String,
    pub total_tool_calls: usize,
    pub history: Vec<IterationRecord>,
}
