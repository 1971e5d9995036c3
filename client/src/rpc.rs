use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Timeout applied to every RPC request.
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient failures.
///
/// The same policy covers the three retry sites of the simulation: clock
/// reads, payment sub-batches, and the HTTP plumbing underneath them. The
/// caller supplies the predicate deciding which errors are worth another
/// attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (including the first one).
    pub max_attempts: usize,
    /// Backoff after the first retryable failure.
    pub initial_backoff: Duration,
    /// Cap on the exponentially growing backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, useful in tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, the error stops being retryable, or the
    /// attempt budget runs out. The last error is returned unwrapped.
    pub async fn run<T, E, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
        retryable: impl Fn(&E) -> bool,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut attempt = 0usize;
        let mut backoff = self.initial_backoff;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts.max(1) && retryable(&err) => {
                    if backoff > Duration::ZERO {
                        sleep(backoff).await;
                        backoff = std::cmp::min(backoff.saturating_mul(2), self.max_backoff);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC over HTTP, shared by the node and wallet proxies.
pub(crate) struct RpcClient {
    http: reqwest::Client,
    url: Url,
    auth: Option<(String, String)>,
}

impl RpcClient {
    pub(crate) fn new(url: Url, auth: Option<(String, String)>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self { http, url, auth })
    }

    pub(crate) async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        debug!(url = %self.url, method, "rpc call");

        let mut builder = self.http.post(self.url.clone()).json(&request);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, Some(password));
        }
        let response = builder.send().await?;

        // Error responses still carry a JSON-RPC body with the real reason;
        // only fall back to the bare status when the body is not parseable.
        let status = response.status();
        let bytes = response.bytes().await?;
        let parsed: RpcResponse = match serde_json::from_slice(&bytes) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(Error::Failed(status)),
            Err(err) => return Err(Error::UnexpectedResponse(err.to_string())),
        };

        if let Some(err) = parsed.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(parsed.result.unwrap_or(Value::Null))
            .map_err(|err| Error::UnexpectedResponse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Soft,
        Hard,
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::immediate(3);
        let result: std::result::Result<u32, TestError> = policy
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::Relaxed);
                    async move {
                        if n < 2 {
                            Err(TestError::Soft)
                        } else {
                            Ok(7)
                        }
                    }
                },
                |err| *err == TestError::Soft,
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::immediate(3);
        let result: std::result::Result<u32, TestError> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::Relaxed);
                    async { Err(TestError::Soft) }
                },
                |err| *err == TestError::Soft,
            )
            .await;
        assert_eq!(result.unwrap_err(), TestError::Soft);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::immediate(3);
        let result: std::result::Result<u32, TestError> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::Relaxed);
                    async { Err(TestError::Hard) }
                },
                |err| *err == TestError::Soft,
            )
            .await;
        assert_eq!(result.unwrap_err(), TestError::Hard);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
