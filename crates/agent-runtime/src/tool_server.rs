//! Stdio Tool Server
//!
//! Runs an external tool server as a child process and talks newline-delimited
//! JSON-RPC 2.0 over its stdin/stdout:
//!
//! ```text
//! spawn → initialize → notifications/initialized → tools/list | tools/call ...
//! ```
//!
//! Writes go through one lock; a single reader task routes each response to
//! the waiter registered under its id, so calls from one batch are in flight
//! together and may complete in any order. Lines that match no waiter (logs,
//! notifications, answers to timed-out requests) are dropped. The child is
//! killed when the server handle is dropped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    tool::{ToolExecutor, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

/// Protocol revision announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Default deadline for a single request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type ResponseWaiter = oneshot::Sender<Value>;

/// Waiters by request id; `None` once the server's stdout has closed
type PendingRequests = Arc<Mutex<Option<HashMap<u64, ResponseWaiter>>>>;

/// Tool listing entry as sent by the server
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

/// A spawned tool server
pub struct StdioToolServer {
    program: String,
    stdin: Mutex<ChildStdin>,
    pending: PendingRequests,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    // held for kill_on_drop
    _child: Child,
}

impl StdioToolServer {
    /// Spawn `program args..` and perform the initialize handshake
    pub async fn spawn(program: &str, args: &[String], request_timeout: Duration) -> Result<Self> {
        tracing::info!(program, ?args, "Spawning tool server");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Config(format!("failed to spawn tool server {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Other("tool server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Other("tool server stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = program.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %name, "{line}");
                }
            });
        }

        let pending: PendingRequests = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(route_responses(
            program.to_string(),
            stdout,
            pending.clone(),
        ));

        let server = Self {
            program: program.to_string(),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader,
            _child: child,
        };

        server.initialize().await?;
        Ok(server)
    }

    async fn initialize(&self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        let protocol = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(server = %self.program, protocol, "Tool server initialized");

        self.notify("notifications/initialized", json!({})).await
    }

    /// Tools the server offers
    pub async fn list_tools(&self) -> Result<Vec<ToolSchema>> {
        let result = self.request("tools/list", json!({})).await?;
        let listed: Vec<ListedTool> =
            serde_json::from_value(result.get("tools").cloned().unwrap_or_else(|| json!([])))?;

        Ok(listed
            .into_iter()
            .map(|tool| ToolSchema {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                input_schema: tool
                    .input_schema
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect())
    }

    /// Requests still waiting for an answer
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.as_ref().map_or(0, HashMap::len)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write(&message).await
    }

    async fn write(&self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn forget(&self, id: u64) {
        if let Some(waiters) = self.pending.lock().await.as_mut() {
            waiters.remove(&id);
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        // register before writing so a fast answer cannot slip past
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(waiters) => {
                waiters.insert(id, tx);
            }
            None => return Err(closed_error()),
        }

        if let Err(err) = self.write(&message).await {
            self.forget(id).await;
            return Err(err);
        }
        tracing::debug!(server = %self.program, id, method, "Sent request");

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(closed_error()),
            Err(_) => {
                self.forget(id).await;
                return Err(AgentError::Timeout(format!(
                    "{method} on {} after {:?}",
                    self.program, self.request_timeout
                )));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(AgentError::ToolExecution(message));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

impl Drop for StdioToolServer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn closed_error() -> AgentError {
    AgentError::Network("tool server closed its output".into())
}

/// Hand each response line to the waiter registered under its id
async fn route_responses(program: String, stdout: ChildStdout, pending: PendingRequests) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(server = %program, error = %err, "Failed reading tool server output");
                break;
            }
        };

        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            tracing::trace!(server = %program, %line, "Skipping non-JSON line");
            continue;
        };
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            tracing::trace!(server = %program, "Skipping notification");
            continue;
        };

        let waiter = pending.lock().await.as_mut().and_then(|w| w.remove(&id));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(message);
            }
            None => tracing::debug!(server = %program, id, "Response for unknown or expired request"),
        }
    }

    tracing::info!(server = %program, "Tool server output closed");
    // dropping the waiters wakes every caller with a closed error
    pending.lock().await.take();
}

/// Turn a `tools/call` result into a tool value
fn call_result_value(result: Value) -> Result<Value> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        });

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(AgentError::ToolExecution(
            text.filter(|t| !t.is_empty())
                .unwrap_or_else(|| "tool reported an error".into()),
        ));
    }

    match text {
        Some(text) => Ok(serde_json::from_str(&text).unwrap_or(Value::String(text))),
        None => Ok(result),
    }
}

#[async_trait]
impl ToolExecutor for StdioToolServer {
    async fn execute(&self, name: &str, input: &Map<String, Value>) -> Result<Value> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": input}))
            .await?;
        call_result_value(result)
    }
}
