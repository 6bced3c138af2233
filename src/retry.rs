//! Classification-driven retry with linear and exponential backoff.
//!
//! Every external call in the pipeline runs through [`execute_with_retry`].
//! The caller supplies a classification function mapping each failure to a
//! [`RetryClass`]; the executor owns the attempt accounting and the sleep
//! schedule. One operation is in flight at a time, so the backoff sleep
//! suspends the pipeline task itself.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How a classified failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Surface the failure immediately (auth, validation, client errors).
    NoRetry,
    /// Sleep `base_delay * attempt_number` between attempts.
    Linear,
    /// Sleep `base_delay * 2^(attempt_number - 1)` between attempts.
    Exponential,
}

/// Attempt budget and base delay for one call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first try.
    pub max_attempts: u32,
    /// Base delay the backoff schedule is built from.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

/// Backoff delay after the `attempt`-th failed attempt (1-based), or `None`
/// when the classification forbids retrying.
pub fn backoff_delay(class: RetryClass, base_delay: Duration, attempt: u32) -> Option<Duration> {
    match class {
        RetryClass::NoRetry => None,
        RetryClass::Linear => Some(base_delay * attempt),
        // Shift capped so a pathological attempt count cannot overflow.
        RetryClass::Exponential => Some(base_delay * (1u32 << (attempt - 1).min(16))),
    }
}

/// Run `op` under `policy`, classifying each failure with `classify`.
///
/// Returns the first success, or the last failure once the classification
/// says stop or the attempt budget is exhausted. Exhaustion is surfaced as
/// the failure value, not a panic; the caller decides whether to escalate.
pub async fn execute_with_retry<T, E, F, Fut, C>(
    policy: RetryPolicy,
    classify: C,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
{
    execute_with_retry_observed(policy, classify, op, |_, _| {}).await
}

/// [`execute_with_retry`] with a callback invoked before each backoff sleep.
///
/// The callback receives the 1-based number of the attempt that failed and
/// the delay about to be slept. Tests drive this with a paused clock to
/// assert the exact schedule.
pub async fn execute_with_retry_observed<T, E, F, Fut, C, Obs>(
    policy: RetryPolicy,
    classify: C,
    mut op: F,
    mut on_backoff: Obs,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
    Obs: FnMut(u32, Duration),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let class = classify(&error);
                let delay = if attempt < policy.max_attempts {
                    backoff_delay(class, policy.base_delay, attempt)
                } else {
                    None
                };
                match delay {
                    Some(delay) => {
                        debug!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "attempt failed, backing off: {}",
                            error
                        );
                        on_backoff(attempt, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                }
            }
        }
    }
}
