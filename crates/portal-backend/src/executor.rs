//! Timeout, cancellation and exponential-backoff retry around outbound calls.

use std::{future::Future, time::{Duration, SystemTime}};

use portal_core::{ClassifiedError, RawError, RequestFailure, ResilienceConfig, RetryPolicy, classify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connectivity::ConnectivityMonitor;

/// Wraps every backend call used by the session layer.
#[derive(Clone)]
pub struct ResilientRequestExecutor {
    connectivity: ConnectivityMonitor,
    attempt_timeout: Duration,
    default_policy: RetryPolicy,
}

impl ResilientRequestExecutor {
    pub fn new(connectivity: ConnectivityMonitor, config: &ResilienceConfig) -> Self {
        Self {
            connectivity,
            attempt_timeout: config.attempt_timeout,
            default_policy: config.retry_policy,
        }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Run `operation` with the default retry policy.
    pub async fn execute<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, RequestFailure>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let policy = self.default_policy;
        self.execute_with_policy(label, &policy, operation).await
    }

    /// Run `operation` until it succeeds, fails terminally, or `policy` is
    /// exhausted.
    ///
    /// Each attempt receives a fresh cancellation token that is cancelled
    /// when the attempt deadline elapses; the attempt future is dropped at
    /// the same time. Only connectivity classifications are retried.
    pub async fn execute_with_policy<T, F, Fut>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, RequestFailure>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        if !self.connectivity.check_now(false).await {
            warn!(operation = label, "backend unreachable; request not attempted");
            return Err(RequestFailure::offline());
        }

        let first_attempt_at = SystemTime::now();
        let mut attempts: u32 = 0;

        loop {
            let delay = policy.delay_before_attempt(attempts);
            if !delay.is_zero() {
                debug!(
                    operation = label,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            attempts += 1;
            let cancel = CancellationToken::new();
            let error = match tokio::time::timeout(self.attempt_timeout, operation(cancel.clone())).await {
                Ok(Ok(value)) => {
                    if attempts > 1 {
                        debug!(operation = label, attempts, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(raw)) => {
                    let classified = classify(&raw);
                    debug!(operation = label, attempt = attempts, raw = ?raw, classified = %classified, "request attempt failed");
                    classified
                }
                Err(_) => {
                    cancel.cancel();
                    debug!(
                        operation = label,
                        attempt = attempts,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "request attempt timed out"
                    );
                    ClassifiedError::RequestTimeout
                }
            };

            if !error.is_retryable() || !policy.allows_another(attempts) {
                let failure = RequestFailure {
                    error,
                    attempts,
                    first_attempt_at: Some(first_attempt_at),
                    failed_at: SystemTime::now(),
                };
                warn!(operation = label, attempts, error = %failure.error, "request failed");
                return Err(failure);
            }
        }
    }
}
