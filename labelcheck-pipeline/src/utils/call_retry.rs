//! Timeout and bounded retry for collaborator calls
//!
//! Every external call runs under `tokio::time::timeout`; an elapsed deadline
//! becomes `ServiceError::Timeout`, which is retryable like any transient error.

use std::future::Future;
use std::time::Duration;

use crate::services::ServiceError;

/// Per-call deadline and retry bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Result of a retried call plus the number of attempts made
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ServiceError>,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails permanently, or the retry bound is reached
pub async fn call_with_retry<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut call: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempts = 0;
    let mut backoff = policy.backoff;

    loop {
        attempts += 1;

        let result = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(policy.timeout)),
        };

        match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(err) if err.is_retryable() && attempts < policy.max_attempts() => {
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts = policy.max_attempts(),
                    error = %err,
                    "Collaborator call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Collaborator call failed"
                );
                return Attempted {
                    result: Err(err),
                    attempts,
                };
            }
        }
    }
}
