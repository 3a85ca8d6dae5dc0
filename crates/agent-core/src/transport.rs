//! Retrying Transport
//!
//! One logical request to the generation endpoint: a bounded number of
//! attempts with exponential backoff and jitter. The wire itself sits behind
//! [`RequestSender`] so the policy can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use crate::error::Result;
use crate::provider::{CompletionRequest, LlmProvider};

/// Retry and timeout settings
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound on any single delay (before jitter)
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,

    /// Per-attempt deadline
    pub timeout: Duration,

    /// Relative jitter applied to each delay, 0.25 = ±25%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            timeout: Duration::from_secs(120),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// `min(initial_delay * multiplier^attempt, max_delay)`, `attempt` counted from 0
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// [`Self::base_delay`] with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
    }
}

/// A single attempt on the wire.
///
/// Implementations map failures onto the error taxonomy so that
/// [`AgentError::is_retryable`](crate::AgentError::is_retryable) can decide:
/// `Http { status }` for non-2xx answers, `Timeout` / `Network` otherwise.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send_once(&self, url: &str, payload: &Value, timeout: Duration) -> Result<Value>;
}

/// Retry loop around a [`RequestSender`], bound to one endpoint
pub struct RetryingTransport<S> {
    sender: S,
    url: String,
    policy: RetryPolicy,
}

impl<S: RequestSender> RetryingTransport<S> {
    pub fn new(sender: S, url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            sender,
            url: url.into(),
            policy,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub const fn sender(&self) -> &S {
        &self.sender
    }

    /// Send `payload` to `url`, retrying transient failures under `policy`.
    ///
    /// 4xx answers fail immediately. Once attempts run out the last error is
    /// returned.
    pub async fn send(&self, url: &str, payload: &Value, policy: &RetryPolicy) -> Result<Value> {
        let attempts = policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.sender.send_once(url, payload, policy.timeout).await {
                Ok(response) => {
                    tracing::debug!(attempt, attempts, url, "Request succeeded");
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = policy.delay(attempt - 1);
                    tracing::warn!(
                        attempt,
                        attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        retryable = err.is_retryable(),
                        error = %err,
                        "Request failed, giving up"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl<S: RequestSender> LlmProvider for RetryingTransport<S> {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        let payload = serde_json::to_value(request)?;
        self.send(&self.url, &payload, &self.policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned attempt outcomes: `Ok(status)` for a JSON body, `Err` for a timeout
    struct ScriptedSender {
        script: Mutex<VecDeque<std::result::Result<u16, ()>>>,
        attempts: AtomicU32,
    }

    impl ScriptedSender {
        fn new(script: Vec<std::result::Result<u16, ()>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RequestSender for ScriptedSender {
        async fn send_once(&self, _url: &str, _payload: &Value, _timeout: Duration) -> Result<Value> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(status)) if status < 300 => Ok(json!({"content": [{"text": "ok"}]})),
                Some(Ok(status)) => Err(AgentError::Http {
                    status,
                    body: "scripted".into(),
                }),
                Some(Err(())) => Err(AgentError::Timeout("scripted".into())),
                None => Err(AgentError::Network("script exhausted".into())),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RetryPolicy::default()
        }
    }

    fn transport(script: Vec<std::result::Result<u16, ()>>) -> RetryingTransport<ScriptedSender> {
        RetryingTransport::new(ScriptedSender::new(script), "http://backend/generate", fast_policy())
    }

    #[tokio::test]
    async fn test_server_errors_then_success() {
        let transport = transport(vec![Ok(500), Ok(500), Ok(200)]);
        let response = transport
            .send("http://backend/generate", &json!({}), &fast_policy())
            .await
            .unwrap();
        assert_eq!(response["content"][0]["text"], json!("ok"));
        assert_eq!(transport.sender().attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let transport = transport(vec![Ok(400), Ok(200)]);
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            ..fast_policy()
        };
        let started = std::time::Instant::now();
        let err = transport
            .send("http://backend/generate", &json!({}), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 400, .. }));
        assert_eq!(transport.sender().attempts.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let transport = transport(vec![Ok(502), Err(()), Ok(503), Ok(200)]);
        let err = transport
            .send("http://backend/generate", &json!({}), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 503, .. }));
        assert_eq!(transport.sender().attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_provider_impl_uses_bound_endpoint() {
        let transport = transport(vec![Err(()), Ok(200)]);
        let request = CompletionRequest::new(Vec::new(), &crate::provider::GenerationOptions::default());
        assert!(transport.complete(&request).await.is_ok());
        assert_eq!(transport.sender().attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1000),
            ..RetryPolicy::default()
        };
        for _ in 0..200 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1250), "{delay:?}");
        }
    }
}
