//! Tool System
//!
//! Tool call types, the [`ToolExecutor`] capability the orchestrator runs
//! calls against, and an in-process [`ToolRegistry`] implementation of it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, `[A-Za-z0-9_-]+`
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments, in the order the model produced them
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl ToolCall {
    /// Create a call with a freshly generated id
    pub fn new(name: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            id: generate_call_id(),
            name: name.into(),
            input,
        }
    }

    /// Create a call reusing an id supplied by the backend
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// `tool_<millis>_<suffix>`
pub fn generate_call_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("tool_{}_{}", chrono::Utc::now().timestamp_millis(), &suffix[..9])
}

/// Give every call an id not in `seen`, recording the ids it ends up with.
///
/// Backends may repeat an id across responses (or within one); a repeat gets
/// a freshly generated id so tool results stay unambiguous within a run.
pub fn assign_unique_ids(calls: &mut [ToolCall], seen: &mut HashSet<String>) {
    for call in calls {
        if seen.insert(call.id.clone()) {
            continue;
        }
        let repeated = std::mem::take(&mut call.id);
        loop {
            call.id = generate_call_id();
            if seen.insert(call.id.clone()) {
                break;
            }
        }
        tracing::debug!(tool = %call.name, repeated = %repeated, id = %call.id, "Replaced repeated tool call id");
    }
}

/// Whether `id` matches `[A-Za-z0-9_-]+`
pub fn is_valid_call_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Outcome of one tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum ToolOutput {
    Success(Value),
    Failure(String),
}

/// Result from executing one [`ToolCall`]. Exactly one per dispatched call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionOutcome {
    /// The call that was executed
    pub call: ToolCall,

    /// Value on success, error message on failure
    pub output: ToolOutput,
}

impl ToolExecutionOutcome {
    pub const fn success(call: ToolCall, value: Value) -> Self {
        Self {
            call,
            output: ToolOutput::Success(value),
        }
    }

    pub fn failure(call: ToolCall, error: impl Into<String>) -> Self {
        Self {
            call,
            output: ToolOutput::Failure(error.into()),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.output, ToolOutput::Success(_))
    }

    /// Text fed back to the model in the tool_result block
    pub fn result_text(&self) -> String {
        match &self.output {
            ToolOutput::Success(Value::String(text)) => text.clone(),
            ToolOutput::Success(value) => value.to_string(),
            ToolOutput::Failure(message) => format!("Error: {message}"),
        }
    }
}

/// Externally supplied capability that runs a named tool.
///
/// The orchestrator never looks behind this trait; an implementation may
/// dispatch in-process ([`ToolRegistry`]) or to a separate tool server.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, input: &Map<String, Value>) -> Result<Value>;
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required,
        }
    }
}

/// Tool definition offered to the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the input object
    pub input_schema: Value,
}

impl ToolSchema {
    /// Build an object schema from flat parameter definitions
    pub fn from_parameters(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &[ParameterSchema],
    ) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in parameters {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Names listed under `required` in the input schema
    pub fn required_parameters(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Tool trait - implement to add an in-process capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for the backend's tool list
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, input: &Map<String, Value>) -> Result<Value>;

    /// Validate arguments before execution (optional)
    fn validate(&self, input: &Map<String, Value>) -> Result<()> {
        let schema = self.schema();

        for name in schema.required_parameters() {
            if !input.contains_key(name) {
                return Err(AgentError::ToolExecution(format!(
                    "Missing required parameter: {name}"
                )));
            }
        }

        Ok(())
    }
}

/// Registry for in-process tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        self.tools.insert(schema.name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool schemas, sorted by name so requests are stable
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, input: &Map<String, Value>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        tool.validate(input)?;
        tool.execute(input).await
    }
}
