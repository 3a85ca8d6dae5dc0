//! HTTP Generation Backend
//!
//! `reqwest`-based [`RequestSender`] plus the [`HttpProvider`] that binds it
//! to one endpoint behind agent-core's retry loop.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    provider::{CompletionRequest, LlmProvider},
    transport::{RequestSender, RetryPolicy, RetryingTransport},
};
use async_trait::async_trait;
use serde_json::Value;

/// Default name of the use-case header
pub const DEFAULT_USE_CASE_HEADER: &str = "x-use-case-id";

/// Generation endpoint configuration
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Endpoint URL (HTTP POST)
    pub url: String,

    /// Bearer token, passed through untouched
    pub api_token: Option<String>,

    /// Use-case identifier, passed through untouched
    pub use_case_id: Option<String>,

    /// Header the use-case identifier travels in
    pub use_case_header: String,

    /// Retry and timeout settings
    pub retry: RetryPolicy,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_token: None,
            use_case_id: None,
            use_case_header: DEFAULT_USE_CASE_HEADER.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Read `AGENT_API_URL`, `AGENT_API_TOKEN`, `AGENT_USE_CASE_ID`,
    /// `AGENT_USE_CASE_HEADER`, `AGENT_TIMEOUT_SECS` and `AGENT_MAX_RETRIES`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("AGENT_API_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AgentError::Config("AGENT_API_URL is not set".into()))?;

        let mut config = Self::new(url);
        config.api_token = lookup("AGENT_API_TOKEN").filter(|t| !t.is_empty());
        config.use_case_id = lookup("AGENT_USE_CASE_ID").filter(|u| !u.is_empty());
        if let Some(header) = lookup("AGENT_USE_CASE_HEADER") {
            config.use_case_header = header;
        }
        if let Some(secs) = lookup("AGENT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| AgentError::Config(format!("AGENT_TIMEOUT_SECS is not a number: {secs}")))?;
            config.retry.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = lookup("AGENT_MAX_RETRIES") {
            config.retry.max_retries = retries.parse().map_err(|_| {
                AgentError::Config(format!("AGENT_MAX_RETRIES is not a number: {retries}"))
            })?;
        }

        Ok(config)
    }
}

/// One POST per attempt
pub struct HttpSender {
    client: reqwest::Client,
    api_token: Option<String>,
    use_case_id: Option<String>,
    use_case_header: String,
}

impl HttpSender {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_token: config.api_token.clone(),
            use_case_id: config.use_case_id.clone(),
            use_case_header: config.use_case_header.clone(),
        }
    }

    fn map_error(err: &reqwest::Error) -> AgentError {
        if err.is_builder() {
            // bad header name or value; retrying cannot help
            AgentError::Config(err.to_string())
        } else if err.is_timeout() {
            AgentError::Timeout(err.to_string())
        } else {
            AgentError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl RequestSender for HttpSender {
    async fn send_once(&self, url: &str, payload: &Value, timeout: Duration) -> Result<Value> {
        let mut request = self.client.post(url).timeout(timeout).json(payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(use_case) = &self.use_case_id {
            request = request.header(self.use_case_header.as_str(), use_case);
        }

        let response = request.send().await.map_err(|e| Self::map_error(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| Self::map_error(&e))?;

        if !status.is_success() {
            return Err(AgentError::Http {
                status: status.as_u16(),
                body,
            });
        }

        // Some gateways answer with bare text; keep it as a JSON string
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Generation endpoint reached over HTTP with retries
pub struct HttpProvider {
    transport: RetryingTransport<HttpSender>,
}

impl HttpProvider {
    /// Create from configuration
    pub fn from_config(config: BackendConfig) -> Self {
        let sender = HttpSender::new(&config);
        Self {
            transport: RetryingTransport::new(sender, config.url, config.retry),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_config(BackendConfig::from_env()?))
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        tracing::debug!(
            url = %self.transport.url(),
            model = %request.model,
            turns = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending completion request"
        );
        self.transport.complete(request).await
    }
}
