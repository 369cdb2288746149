// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Retry-with-backoff for the advisory transient-error classes
//! (`TEMPORARY_FAILURE`, `EXECUTOR_TEMPORARY_FAILURE`): callers of the
//! runtime RPC and the batch executor may retry these with backoff; every
//! other error class is final.

use std::time::Duration;
use trac_error::{ErrorCode, TracError};

/// Exponential backoff with jitter-free bounded growth, the shape the
/// supervisor applies to a failed poll/submit before trying again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt number (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Outcome of a retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    ExhaustedRetries { last_error: TracError, attempts: u32 },
    FatalError(TracError),
}

/// Run `op` under `policy`, retrying only on errors whose [`ErrorCode`] is
/// retryable. Any other error is returned immediately as
/// [`RetryOutcome::FatalError`].
pub async fn retry_with_backoff<F, Fut, T>(policy: RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TracError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return RetryOutcome::Succeeded { value, attempts: attempt },
            Err(err) if !err.code.is_retryable() => return RetryOutcome::FatalError(err),
            Err(err) if attempt >= policy.max_attempts => {
                return RetryOutcome::ExhaustedRetries {
                    last_error: err,
                    attempts: attempt,
                }
            }
            Err(err) => {
                tracing::debug!(attempt, code = err.code.code(), "retrying after transient error");
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

/// Map a runtime RPC failure (spec §4.5: "Runtime RPC error mapping") onto
/// the closed [`ErrorCode`] taxonomy. `grpc_status` is the numeric gRPC
/// status code the in-batch runtime returned.
#[must_use]
pub fn map_runtime_rpc_error(grpc_status: u32, message: impl Into<String>) -> TracError {
    let code = match grpc_status {
        14 | 4 => ErrorCode::TemporaryFailure, // UNAVAILABLE, DEADLINE_EXCEEDED
        16 | 7 => ErrorCode::Access,           // UNAUTHENTICATED, PERMISSION_DENIED
        3 | 9 => ErrorCode::Validation,        // INVALID_ARGUMENT, FAILED_PRECONDITION
        _ => ErrorCode::ExecutorFailure,
    };
    TracError::new(code, message).with_context("grpc_status", grpc_status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 3.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn runtime_rpc_error_mapping_matches_spec() {
        assert_eq!(map_runtime_rpc_error(14, "x").code, ErrorCode::TemporaryFailure);
        assert_eq!(map_runtime_rpc_error(4, "x").code, ErrorCode::TemporaryFailure);
        assert_eq!(map_runtime_rpc_error(16, "x").code, ErrorCode::Access);
        assert_eq!(map_runtime_rpc_error(3, "x").code, ErrorCode::Validation);
        assert_eq!(map_runtime_rpc_error(99, "x").code, ErrorCode::ExecutorFailure);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let outcome = retry_with_backoff(
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
            move || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TracError::new(ErrorCode::TemporaryFailure, "not yet"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                assert_eq!(value, 42);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let outcome: RetryOutcome<()> = retry_with_backoff(RetryPolicy::default(), || async {
            Err(TracError::new(ErrorCode::NotFound, "gone"))
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::FatalError(_)));
    }
}
