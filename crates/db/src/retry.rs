//! Retry-on-contention for store calls.
//!
//! Worker processes and the API server write the same rows concurrently,
//! so Postgres occasionally answers with serialization failures, lock
//! timeouts or stale prepared statements. [`with_retry`] retries those with
//! exponential backoff and gives up after [`RetryPolicy::max_attempts`].
//! Anything else fails on the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreError;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// SQLSTATE codes treated as contention rather than bugs.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled (lock_timeout / statement_timeout)
    "42P05", // duplicate_prepared_statement
    "26000", // invalid_sql_statement_name (stale prepared statement)
];

/// Whether an error is worth retrying.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => match db.code() {
            // Class 08: connection exceptions.
            Some(code) => code.starts_with("08") || TRANSIENT_SQLSTATES.iter().any(|c| *c == code),
            None => false,
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent.
///
/// `operation` names the call in logs and in [`StoreError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "Store call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => return Err(StoreError::Database(e)),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    operation,
                    attempts = attempt,
                    error = %e,
                    "Store retries exhausted",
                );
                return Err(StoreError::RetriesExhausted {
                    operation,
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient store error, retrying",
                );
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay = next_delay(delay, policy);
    }
}
