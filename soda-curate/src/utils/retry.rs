//! Retry combinators
//!
//! Two layers:
//! - `retry_transient`: exponential backoff for rate-limit/transport errors
//!   inside a single attempt, bounded by a wall-clock budget
//! - `bounded_retry`: at most N independent attempts gated by a success
//!   predicate; on exhaustion the best candidate is returned, marked unsuccessful

use crate::error::{CurationError, CurationResult};
use std::future::Future;
use std::time::{Duration, Instant};

/// Outcome of a bounded retry loop
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Accepted candidate, or the best rejected one if none was accepted
    pub result: Option<T>,
    pub attempts_used: u32,
    pub succeeded: bool,
    /// Error from the most recent failed attempt
    pub last_error: Option<CurationError>,
}

impl<T> RetryOutcome<T> {
    /// True when no attempt produced any candidate
    pub fn is_exhausted_empty(&self) -> bool {
        self.result.is_none()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RetryOutcome<U> {
        RetryOutcome {
            result: self.result.map(f),
            attempts_used: self.attempts_used,
            succeeded: self.succeeded,
            last_error: self.last_error,
        }
    }
}

/// Run `attempt` up to `max_attempts` times until `is_success` accepts a result
///
/// Keeps the most recent rejected candidate as the fallback.
///
/// # Arguments
/// * `operation_name` - Name for logging
/// * `max_attempts` - Upper bound on attempts (values below 1 are treated as 1)
/// * `attempt` - Receives the 1-based attempt number
/// * `is_success` - Acceptance predicate for a produced candidate
pub async fn bounded_retry<T, F, Fut, P>(
    operation_name: &str,
    max_attempts: u32,
    attempt: F,
    is_success: P,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CurationResult<T>>,
    P: FnMut(&T) -> bool,
{
    // Later candidates win ties
    let mut counter = 0u32;
    bounded_retry_ranked(operation_name, max_attempts, attempt, is_success, move |_| {
        counter += 1;
        counter as f64
    })
    .await
}

/// Like `bounded_retry`, but keeps the rejected candidate with the highest rank
///
/// **Algorithm:**
/// 1. Run the attempt
/// 2. Error: remember it, continue
/// 3. Candidate accepted: return it with `succeeded = true`
/// 4. Candidate rejected: keep it if it outranks the current fallback
/// 5. After the last attempt return the fallback with `succeeded = false`
pub async fn bounded_retry_ranked<T, F, Fut, P, R>(
    operation_name: &str,
    max_attempts: u32,
    mut attempt: F,
    mut is_success: P,
    mut rank: R,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CurationResult<T>>,
    P: FnMut(&T) -> bool,
    R: FnMut(&T) -> f64,
{
    let max_attempts = max_attempts.max(1);
    let mut best: Option<(T, f64)> = None;
    let mut last_error = None;

    for n in 1..=max_attempts {
        if n > 1 {
            tracing::debug!(operation = operation_name, attempt = n, max_attempts, "Retrying");
        }

        match attempt(n).await {
            Ok(candidate) => {
                if is_success(&candidate) {
                    if n > 1 {
                        tracing::info!(
                            operation = operation_name,
                            attempt = n,
                            "Operation accepted after retry"
                        );
                    }
                    return RetryOutcome {
                        result: Some(candidate),
                        attempts_used: n,
                        succeeded: true,
                        last_error,
                    };
                }

                let score = rank(&candidate);
                tracing::debug!(
                    operation = operation_name,
                    attempt = n,
                    rank = score,
                    "Candidate rejected by success predicate"
                );
                let better = best.as_ref().map_or(true, |(_, s)| score >= *s);
                if better {
                    best = Some((candidate, score));
                }
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt = n,
                    error = %err,
                    "Attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    tracing::warn!(
        operation = operation_name,
        attempts = max_attempts,
        has_fallback = best.is_some(),
        "Retries exhausted, degrading to best available result"
    );
    RetryOutcome {
        result: best.map(|(candidate, _)| candidate),
        attempts_used: max_attempts,
        succeeded: false,
        last_error,
    }
}

/// Retry an operation with exponential backoff while it fails transiently
///
/// **Backoff Strategy:**
/// - Initial delay: 100ms
/// - Max delay: 5000ms
/// - Multiplier: 2.0
///
/// Non-transient errors return immediately. Once `max_wait_ms` has elapsed the
/// last transient error is returned.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> CurationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CurationResult<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 100u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Call succeeded after transient retries"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Transient failures exceeded retry budget"
                    );
                    return Err(err);
                }

                let sleep_ms = backoff_ms
                    .min(5000)
                    .min(max_duration.saturating_sub(elapsed).as_millis() as u64);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = sleep_ms,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                backoff_ms = (backoff_ms * 2).min(5000);
            }
        }
    }
}

/// Run a future under a time budget, mapping expiry to `CurationError::Timeout`
pub async fn with_timeout<T, Fut>(budget: Duration, future: Fut) -> CurationResult<T>
where
    Fut: Future<Output = CurationResult<T>>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result,
        Err(_) => Err(CurationError::Timeout(budget.as_millis() as u64)),
    }
}
