//! Fixed-delay retry for external collaborators
//!
//! Used for the PAE service (async) and the DSSP subprocess (blocking).
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is transient and attempts remain: log WARN, sleep the fixed delay, retry
//! 4. If the error is transient and attempts are exhausted: return `Exhausted` with the last error
//! 5. If the error is not transient: return `Fatal` immediately (no retry)

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Attempt budget and delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Fixed delay before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no delay
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Retry failure
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Transient failures used the whole budget
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: E,
    },

    /// Non-transient failure, not retried
    #[error("{operation} failed: {error}")]
    Fatal { operation: String, error: E },
}

/// Retry an async operation
pub async fn retry_async<F, Fut, T, E, P>(
    operation_name: &str,
    policy: RetryPolicy,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                match next_step(operation_name, policy, attempt, error, &is_transient) {
                    Step::Retry => tokio::time::sleep(policy.delay).await,
                    Step::Stop(e) => return Err(e),
                }
            }
        }
    }
}

/// Retry a blocking operation (call from a blocking context)
pub fn retry_blocking<F, T, E, P>(
    operation_name: &str,
    policy: RetryPolicy,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => match next_step(operation_name, policy, attempt, error, &is_transient) {
                Step::Retry => std::thread::sleep(policy.delay),
                Step::Stop(e) => return Err(e),
            },
        }
    }
}

enum Step<E> {
    Retry,
    Stop(RetryError<E>),
}

fn next_step<E, P>(operation_name: &str, policy: RetryPolicy, attempt: u32, error: E, is_transient: &P) -> Step<E>
where
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    if !is_transient(&error) {
        return Step::Stop(RetryError::Fatal {
            operation: operation_name.to_string(),
            error,
        });
    }

    if attempt >= policy.max_attempts {
        tracing::error!(
            operation = operation_name,
            attempt,
            error = %error,
            "Attempt budget exhausted"
        );
        return Step::Stop(RetryError::Exhausted {
            operation: operation_name.to_string(),
            attempts: attempt,
            last: error,
        });
    }

    tracing::warn!(
        operation = operation_name,
        attempt,
        max_attempts = policy.max_attempts,
        delay_ms = policy.delay.as_millis() as u64,
        error = %error,
        "Transient failure, will retry after delay"
    );
    Step::Retry
}
