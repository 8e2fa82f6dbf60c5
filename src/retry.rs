//! Retry with exponential backoff for transport calls
//!
//! Classifies every transport outcome as success, retryable failure, or
//! terminal failure, and drives retries with a deterministic exponential
//! backoff (no jitter): `backoff_factor * 2^(attempt - 1)` seconds before
//! the attempt-th retry.

use crate::error::{MeshboxError, Result};
use reqwest::Method;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Immutable retry configuration, validated at construction.
///
/// A failure is retryable if it is a connection-level error, or an HTTP
/// status in `retryable_statuses` on a method in `retryable_methods`.
/// `max_retries = 0` disables retries entirely.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_factor: f64,
    retryable_statuses: HashSet<u16>,
    retryable_methods: HashSet<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 0.5,
            retryable_statuses: [425, 429, 500, 502, 503, 504].into_iter().collect(),
            retryable_methods: [Method::GET, Method::PUT, Method::DELETE, Method::POST]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit settings.
    ///
    /// Fails with a `Config` error if `backoff_factor` is negative or
    /// not finite.
    pub fn new(
        max_retries: u32,
        backoff_factor: f64,
        retryable_statuses: impl IntoIterator<Item = u16>,
        retryable_methods: impl IntoIterator<Item = Method>,
    ) -> Result<Self> {
        if !backoff_factor.is_finite() || backoff_factor < 0.0 {
            return Err(MeshboxError::Config(format!(
                "backoff_factor must be a non-negative finite number, got {backoff_factor}"
            )));
        }
        Ok(Self {
            max_retries,
            backoff_factor,
            retryable_statuses: retryable_statuses.into_iter().collect(),
            retryable_methods: retryable_methods.into_iter().collect(),
        })
    }

    /// A policy that never retries. Used for the initial send request,
    /// where a retry could create a duplicate message.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: 0.0,
            retryable_statuses: HashSet::new(),
            retryable_methods: HashSet::new(),
        }
    }

    /// Default policy with a different retry count.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Delay before the `attempt`-th retry (1-based): `factor * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        Duration::from_secs_f64(self.backoff_factor * 2f64.powi(exp as i32))
    }

    /// Classify an error for the given request method.
    pub fn decide(&self, error: &MeshboxError, method: &Method) -> RetryDecision {
        if error.is_connection_error() {
            return RetryDecision::Retry;
        }
        match error {
            MeshboxError::HttpStatus { status, .. }
                if self.retryable_statuses.contains(status)
                    && self.retryable_methods.contains(method) =>
            {
                RetryDecision::Retry
            }
            _ => RetryDecision::NoRetry,
        }
    }
}

/// Retry classification for a single failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The failure is transient under the active policy
    Retry,
    /// The failure is terminal; surface it immediately
    NoRetry,
}

/// Execute an async operation under a retry policy.
///
/// Makes at most `max_retries + 1` attempts. Once attempts are spent the
/// last error is wrapped in `RetryExhausted`, except with `max_retries = 0`
/// where the raw error is surfaced immediately (retryable collapses into
/// terminal). Attempt state is local to this call; concurrent calls do not
/// share counters.
pub async fn with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    method: &Method,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;

                match policy.decide(&e, method) {
                    RetryDecision::NoRetry => {
                        debug!(
                            operation = operation_name,
                            attempts, "Terminal failure, not retrying: {}", e
                        );
                        return Err(e);
                    }
                    RetryDecision::Retry => {
                        if attempts > policy.max_retries {
                            if policy.max_retries == 0 {
                                return Err(e);
                            }
                            warn!(
                                operation = operation_name,
                                attempts, "Retries exhausted: {}", e
                            );
                            return Err(MeshboxError::RetryExhausted {
                                attempts,
                                source: Box::new(e),
                            });
                        }

                        let backoff = policy.backoff_delay(attempts);
                        warn!(
                            operation = operation_name,
                            attempt = attempts,
                            max_attempts = policy.max_retries + 1,
                            backoff_secs = backoff.as_secs_f64(),
                            "Retrying after error: {}",
                            e
                        );
                        sleep(backoff).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable_503() -> MeshboxError {
        MeshboxError::HttpStatus {
            status: 503,
            body: "service unavailable".to_string(),
        }
    }

    #[test]
    fn backoff_is_deterministic() {
        let policy = RetryPolicy::new(5, 0.5, [503], [Method::GET]).unwrap();

        // 0.5 * 2^(k-1): 0.5, 1, 2, 4
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(4));
    }

    #[test]
    fn negative_backoff_factor_is_rejected() {
        assert!(RetryPolicy::new(3, -1.0, [], []).is_err());
        assert!(RetryPolicy::new(3, f64::NAN, [], []).is_err());
    }

    #[test]
    fn decision_requires_both_status_and_method() {
        let policy = RetryPolicy::new(3, 0.1, [503], [Method::GET]).unwrap();

        assert_eq!(
            policy.decide(&retryable_503(), &Method::GET),
            RetryDecision::Retry
        );
        // POST is not in the retryable method set
        assert_eq!(
            policy.decide(&retryable_503(), &Method::POST),
            RetryDecision::NoRetry
        );
        // 404 is not in the retryable status set
        let not_found = MeshboxError::HttpStatus {
            status: 404,
            body: String::new(),
        };
        assert_eq!(policy.decide(&not_found, &Method::GET), RetryDecision::NoRetry);
    }

    #[test]
    fn connection_errors_retry_regardless_of_method() {
        let policy = RetryPolicy::new(3, 0.1, [503], [Method::GET]).unwrap();
        let err = MeshboxError::Transport("connection reset".to_string());
        assert_eq!(policy.decide(&err, &Method::POST), RetryDecision::Retry);
    }

    #[tokio::test]
    async fn makes_exactly_max_retries_plus_one_attempts() {
        let policy = RetryPolicy::new(2, 0.0, [503], [Method::GET]).unwrap();
        let mut attempts = 0;

        let result: Result<()> = with_policy(&policy, &Method::GET, "test", || {
            attempts += 1;
            async { Err(retryable_503()) }
        })
        .await;

        assert_eq!(attempts, 3);
        match result {
            Err(MeshboxError::RetryExhausted { attempts: a, source }) => {
                assert_eq!(a, 3);
                assert_eq!(source.status(), Some(503));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_retries_surfaces_raw_error_after_one_attempt() {
        let policy = RetryPolicy::none();
        let mut attempts = 0;

        let result: Result<()> = with_policy(&policy, &Method::GET, "test", || {
            attempts += 1;
            async { Err(retryable_503()) }
        })
        .await;

        assert_eq!(attempts, 1);
        match result {
            Err(MeshboxError::HttpStatus { status: 503, .. }) => {}
            other => panic!("expected raw HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let mut attempts = 0;

        let result: Result<()> = with_policy(&policy, &Method::GET, "test", || {
            attempts += 1;
            async {
                Err(MeshboxError::HttpStatus {
                    status: 400,
                    body: "bad request".to_string(),
                })
            }
        })
        .await;

        assert_eq!(attempts, 1);
        assert!(matches!(
            result,
            Err(MeshboxError::HttpStatus { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, 0.0, [503], [Method::PUT]).unwrap();
        let mut attempts = 0;

        let result = with_policy(&policy, &Method::PUT, "test", || {
            attempts += 1;
            let fail = attempts < 3;
            async move {
                if fail {
                    Err(retryable_503())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(attempts, 3);
        assert_eq!(result.unwrap(), "ok");
    }
}
