//! Orchestration Loop
//!
//! Drives a conversation with the backend until it produces a final answer,
//! executing tool batches between requests. Transition decisions come from
//! [`crate::state::next_transition`]; this module performs the side effects.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::coordinator::execute_batch;
use crate::error::{AgentError, Result};
use crate::extract::extract_text;
use crate::history::{IterationRecord, OrchestrationResult};
use crate::message::{Conversation, ConversationTurn};
use crate::provider::{CompletionRequest, GenerationOptions, LlmProvider};
use crate::state::{LoopHeuristics, RunState, Transition, iteration_cap, next_transition};
use crate::tool::{ToolExecutor, ToolSchema, assign_unique_ids};

/// Sent after output was cut off at a tool-call marker
pub const RECOVER_DIRECTIVE: &str = "Your previous response was cut off before the tool call was complete. \
Either respond with a complete JSON block of the form \
{\"tool_calls\": [{\"name\": \"tool_name\", \"parameters\": {}}]} \
or give your final answer now.";

/// Sent when an early response is neither a tool call nor an answer
pub const CHOICE_DIRECTIVE: &str = "Please choose explicitly: either call a tool with a JSON block of the form \
{\"tool_calls\": [{\"name\": \"tool_name\", \"parameters\": {}}]}, \
or provide your complete final answer.";

/// Appended to the conversation for the tool-free summary request
pub const SUMMARY_INSTRUCTION: &str = "Do not call any more tools. Summarize what you have found so far \
and give the best final answer you can from the information already gathered.";

/// Orchestrator configuration. Built once, passed by reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Model and sampling parameters
    #[serde(default)]
    pub generation: GenerationOptions,

    /// Tool call budget for one run
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,

    /// Expected calls per batch; sizes the iteration cap
    #[serde(default = "default_nominal_batch_size")]
    pub nominal_batch_size: usize,

    /// Final-answer heuristics
    #[serde(default)]
    pub heuristics: LoopHeuristics,

    /// Tools offered on every non-summary request
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

const fn default_max_tool_calls() -> usize {
    20
}
const fn default_nominal_batch_size() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            generation: GenerationOptions::default(),
            max_tool_calls: default_max_tool_calls(),
            nominal_batch_size: default_nominal_batch_size(),
            heuristics: LoopHeuristics::default(),
            tools: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tool_calls == 0 {
            return Err(AgentError::Config("max_tool_calls must be at least 1".into()));
        }
        if self.nominal_batch_size == 0 {
            return Err(AgentError::Config("nominal_batch_size must be at least 1".into()));
        }
        if self.generation.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".into()));
        }
        Ok(())
    }

    pub const fn iteration_cap(&self) -> usize {
        iteration_cap(self.max_tool_calls, self.nominal_batch_size)
    }
}

/// Runs orchestrations. Holds no per-run state, so one instance can serve
/// any number of concurrent runs.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn ToolExecutor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            config,
        }
    }

    /// Get configuration
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run on a single user prompt
    pub async fn run(&self, prompt: &str) -> Result<OrchestrationResult> {
        self.run_conversation(Conversation::from_prompt(prompt)).await
    }

    /// Run on an existing conversation whose last turn is the user's.
    ///
    /// Only a failure of the very first request is returned as an error;
    /// every later failure ends in a summary or a fallback message.
    pub async fn run_conversation(&self, conversation: Conversation) -> Result<OrchestrationResult> {
        let span = tracing::info_span!("orchestration", run_id = %uuid::Uuid::new_v4());
        self.drive(conversation).instrument(span).await
    }

    async fn drive(&self, mut conversation: Conversation) -> Result<OrchestrationResult> {
        let cap = self.config.iteration_cap();
        let mut iteration: u32 = 0;
        let mut total_tool_calls = 0usize;
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        tracing::info!(
            cap,
            max_tool_calls = self.config.max_tool_calls,
            "Starting orchestration"
        );

        while (iteration as usize) < cap && total_tool_calls < self.config.max_tool_calls {
            iteration += 1;

            let request = CompletionRequest::new(conversation.turns().to_vec(), &self.config.generation)
                .with_tools(&self.config.tools);
            let response = match self.provider.complete(&request).await {
                Ok(response) => response,
                Err(err) if iteration == 1 => {
                    tracing::error!(error = %err, "Initial request failed");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(iteration, error = %err, "Request failed, falling back to summary");
                    break;
                }
            };

            let state = RunState {
                iteration,
                total_tool_calls,
                max_tool_calls: self.config.max_tool_calls,
                history_len: history.len(),
            };

            match next_transition(&state, &response, &self.config.heuristics) {
                Transition::Execute(mut calls) => {
                    assign_unique_ids(&mut calls, &mut seen_ids);
                    tracing::info!(iteration, count = calls.len(), "Executing tool calls");
                    let batch = execute_batch(calls, self.executor.as_ref()).await;
                    total_tool_calls += batch.outcomes.len();
                    let record = IterationRecord::from_outcomes(iteration, &batch.outcomes);
                    if record.failures() > 0 {
                        tracing::warn!(iteration, failures = record.failures(), "Some tool calls failed");
                    }
                    conversation.push(batch.assistant_turn);
                    conversation.push(batch.user_turn);
                    history.push(record);
                }
                Transition::Recover { partial_text } => {
                    tracing::info!(iteration, "Response truncated at tool marker, re-prompting");
                    push_directive(&mut conversation, partial_text, RECOVER_DIRECTIVE);
                }
                Transition::Redirect { partial_text } => {
                    tracing::info!(iteration, "No tool call or answer, asking model to choose");
                    push_directive(&mut conversation, partial_text, CHOICE_DIRECTIVE);
                }
                Transition::Finish(final_content) => {
                    tracing::info!(iteration, total_tool_calls, "Orchestration finished");
                    return Ok(OrchestrationResult {
                        final_content,
                        total_tool_calls,
                        history,
                    });
                }
                Transition::Summarize => break,
            }
        }

        tracing::info!(iteration, total_tool_calls, "Budget exhausted, summarizing");
        let final_content = match self.summarize(&conversation).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(error = %err, "Summary request failed, using fallback");
                fallback_summary(iteration, total_tool_calls)
            }
        };

        Ok(OrchestrationResult {
            final_content,
            total_tool_calls,
            history,
        })
    }

    /// One tool-free request asking the model to wrap up
    async fn summarize(&self, conversation: &Conversation) -> Result<String> {
        let request = CompletionRequest::new(
            conversation.with_instruction(SUMMARY_INSTRUCTION),
            &self.config.generation,
        );
        let response = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| AgentError::SummaryFailed(e.to_string()))?;

        let text = extract_text(&response);
        if text.trim().is_empty() {
            return Err(AgentError::SummaryFailed("summary response had no text".into()));
        }
        Ok(text)
    }
}

fn push_directive(conversation: &mut Conversation, partial_text: String, directive: &str) {
    if !partial_text.trim().is_empty() {
        conversation.push(ConversationTurn::assistant(partial_text));
    }
    conversation.push(ConversationTurn::user(directive));
}

fn fallback_summary(iterations: u32, tool_calls: usize) -> String {
    format!(
        "I completed {iterations} iteration(s) and made {tool_calls} tool call(s), \
but could not produce a final summary. Please try again or narrow the request."
    )
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    executor: Option<Arc<dyn ToolExecutor>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.config.tools = tools;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.generation.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_tool_calls(mut self, max: usize) -> Self {
        self.config.max_tool_calls = max;
        self
    }

    #[must_use]
    pub const fn nominal_batch_size(mut self, size: usize) -> Self {
        self.config.nominal_batch_size = size;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| AgentError::Config("Tool executor is required".into()))?;
        self.config.validate()?;

        Ok(Orchestrator::new(provider, executor, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentBlock, Role};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request
    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<std::result::Result<Value, u16>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<std::result::Result<Value, u16>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
            self.requests.lock().unwrap().push(request.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(status)) => Err(AgentError::Http {
                    status,
                    body: "scripted failure".into(),
                }),
                None => Err(AgentError::Network("script exhausted".into())),
            }
        }
    }

    /// "X" always fails; anything else echoes its input
    struct TestExecutor;

    #[async_trait]
    impl ToolExecutor for TestExecutor {
        async fn execute(&self, name: &str, input: &Map<String, Value>) -> Result<Value> {
            if name == "X" {
                return Err(AgentError::ToolExecution("X is broken".into()));
            }
            Ok(json!({"tool": name, "input": input}))
        }
    }

    fn text(t: &str) -> Value {
        json!({"content": [{"type": "text", "text": t}], "stop_reason": "end_turn"})
    }

    fn tool_use(calls: &[(&str, &str)]) -> Value {
        let blocks: Vec<Value> = calls
            .iter()
            .map(|(id, name)| json!({"type": "tool_use", "id": id, "name": name, "input": {"q": id}}))
            .collect();
        json!({"content": blocks, "stop_reason": "tool_use"})
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(provider, Arc::new(TestExecutor), config)
    }

    const ANSWER: &str = "Here is the complete final answer to your question.";

    #[tokio::test]
    async fn test_direct_answer() {
        let provider = ScriptedProvider::new(vec![Ok(text(ANSWER))]);
        let result = orchestrator(provider.clone(), OrchestratorConfig::default())
            .run("What is up?")
            .await
            .unwrap();

        assert_eq!(result.final_content, ANSWER);
        assert_eq!(result.total_tool_calls, 0);
        assert!(result.history.is_empty());
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_tool_does_not_abort_run() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_use(&[("call_x", "X"), ("call_y", "Y")])),
            Ok(text(ANSWER)),
        ]);
        let config = OrchestratorConfig {
            tools: vec![ToolSchema {
                name: "Y".into(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            }],
            ..OrchestratorConfig::default()
        };
        let result = orchestrator(provider.clone(), config)
            .run("Do both")
            .await
            .unwrap();

        assert_eq!(result.final_content, ANSWER);
        assert_eq!(result.total_tool_calls, 2);
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.history[0].iteration, 1);
        assert!(!result.history[0].results[0].success);
        assert!(result.history[0].results[1].success);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].tools.is_some());
        let turns = &requests[1].messages;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].tool_use_ids(), vec!["call_x", "call_y"]);
        assert_eq!(turns[2].role, Role::User);
        assert_eq!(turns[2].tool_result_ids(), vec!["call_x", "call_y"]);
        assert_eq!(
            turns[2].content[0],
            ContentBlock::tool_result("call_x", "Error: X is broken")
        );
    }

    #[tokio::test]
    async fn test_budget_never_exceeded() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_use(&[("a1", "A"), ("a2", "A")])),
            Ok(tool_use(&[("b1", "B"), ("b2", "B")])),
            Ok(text("Summary: found the relevant issues.")),
        ]);
        let config = OrchestratorConfig {
            max_tool_calls: 3,
            nominal_batch_size: 1,
            ..OrchestratorConfig::default()
        };
        let result = orchestrator(provider.clone(), config).run("Go").await.unwrap();

        assert_eq!(result.total_tool_calls, 3);
        assert_eq!(result.history[1].tool_calls.len(), 1);
        assert_eq!(result.history[1].tool_calls[0].id, "b1");
        assert_eq!(result.final_content, "Summary: found the relevant issues.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        let summary = &requests[2];
        assert!(summary.tools.is_none());
        assert!(summary.messages.last().unwrap().text().contains(SUMMARY_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_empty_first_response_gets_directive() {
        let provider = ScriptedProvider::new(vec![Ok(text("")), Ok(text(ANSWER))]);
        let result = orchestrator(provider.clone(), OrchestratorConfig::default())
            .run("Hello")
            .await
            .unwrap();

        assert_eq!(result.final_content, ANSWER);
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.text(), CHOICE_DIRECTIVE);
    }

    #[tokio::test]
    async fn test_stalled_run_summarizes() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_use(&[("c1", "A")])),
            Ok(tool_use(&[("c2", "A")])),
            Ok(tool_use(&[("c3", "A")])),
            Ok(text("")),
            Ok(text("Final summary of the three lookups.")),
        ]);
        let config = OrchestratorConfig {
            max_tool_calls: 20,
            nominal_batch_size: 4,
            ..OrchestratorConfig::default()
        };
        let result = orchestrator(provider.clone(), config).run("Go").await.unwrap();

        assert_eq!(result.history.len(), 3);
        assert_eq!(result.final_content, "Final summary of the three lookups.");
        assert!(provider.requests()[4].tools.is_none());
    }

    #[tokio::test]
    async fn test_truncated_output_is_recovered() {
        let provider = ScriptedProvider::new(vec![
            Ok(json!({
                "content": [{"type": "text", "text": "Let me check the repo."}],
                "stop_reason": "stop_sequence",
                "stop_sequence": "<function_calls>",
            })),
            Ok(text(ANSWER)),
        ]);
        let result = orchestrator(provider.clone(), OrchestratorConfig::default())
            .run("Check it")
            .await
            .unwrap();

        assert_eq!(result.final_content, ANSWER);
        let turns = &provider.requests()[1].messages;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1], ConversationTurn::assistant("Let me check the repo."));
        assert_eq!(turns[2].text(), RECOVER_DIRECTIVE);
    }

    #[tokio::test]
    async fn test_first_request_failure_propagates() {
        let provider = ScriptedProvider::new(vec![Err(503)]);
        let err = orchestrator(provider, OrchestratorConfig::default())
            .run("Hello")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_later_failures_fall_back() {
        let provider = ScriptedProvider::new(vec![Ok(tool_use(&[("d1", "A")])), Err(500), Err(500)]);
        let result = orchestrator(provider, OrchestratorConfig::default())
            .run("Go")
            .await
            .unwrap();

        assert_eq!(result.total_tool_calls, 1);
        assert!(result.final_content.contains("2 iteration(s)"));
        assert!(result.final_content.contains("1 tool call(s)"));
    }

    #[tokio::test]
    async fn test_empty_summary_uses_fallback() {
        let provider = ScriptedProvider::new(vec![Ok(tool_use(&[("e1", "A")])), Ok(text("  "))]);
        let config = OrchestratorConfig {
            max_tool_calls: 1,
            nominal_batch_size: 1,
            ..OrchestratorConfig::default()
        };
        let result = orchestrator(provider.clone(), config).run("Go").await.unwrap();

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(result.total_tool_calls, 1);
        assert_eq!(result.final_content, fallback_summary(1, 1));
    }

    #[tokio::test]
    async fn test_iteration_cap_without_history_summarizes() {
        let truncated = json!({
            "content": [{"type": "text", "text": "Checking."}],
            "stop_reason": "stop_sequence",
            "stop_sequence": "\"tool_calls\"",
        });
        let mut script: Vec<std::result::Result<Value, u16>> =
            (0..5).map(|_| Ok(truncated.clone())).collect();
        script.push(Ok(text("Nothing could be looked up, so here is what I know.")));
        let provider = ScriptedProvider::new(script);
        let config = OrchestratorConfig {
            tools: vec![ToolSchema {
                name: "A".into(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            }],
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.iteration_cap(), 5);

        let result = orchestrator(provider.clone(), config).run("Go").await.unwrap();

        assert!(result.history.is_empty());
        assert_eq!(result.total_tool_calls, 0);
        assert_eq!(
            result.final_content,
            "Nothing could be looked up, so here is what I know."
        );
        let requests = provider.requests();
        assert_eq!(requests.len(), 6);
        assert!(requests[4].tools.is_some());
        assert!(requests[5].tools.is_none());
    }

    #[tokio::test]
    async fn test_repeated_backend_ids_are_made_unique() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_use(&[("toolu_1", "A")])),
            Ok(tool_use(&[("toolu_1", "A")])),
            Ok(text(ANSWER)),
        ]);
        let result = orchestrator(provider.clone(), OrchestratorConfig::default())
            .run("Go")
            .await
            .unwrap();

        assert_eq!(result.history[0].tool_calls[0].id, "toolu_1");
        let second = &result.history[1].tool_calls[0].id;
        assert_ne!(second, "toolu_1");

        let turns = &provider.requests()[2].messages;
        assert_eq!(turns[3].tool_use_ids(), vec![second.as_str()]);
        assert_eq!(turns[4].tool_result_ids(), vec![second.as_str()]);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        assert!(matches!(
            OrchestratorBuilder::new().build(),
            Err(AgentError::Config(_))
        ));
        let built = OrchestratorBuilder::new()
            .provider(ScriptedProvider::new(Vec::new()))
            .executor(Arc::new(TestExecutor))
            .max_tool_calls(0)
            .build();
        assert!(matches!(built, Err(AgentError::Config(_))));
    }
}
