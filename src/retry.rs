//! Bounded retry policy for flaky UI interactions

use std::time::Duration;

/// Max attempts plus an exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier: 2,
        }
    }

    /// A policy that tries once and never waits
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Whether another attempt is allowed after `attempt` failed
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

/// Await `$op` until it succeeds, fails permanently, or the policy is spent.
///
/// `$op` is re-evaluated on each attempt, so element lookups happen again.
macro_rules! retry_transient {
    ($policy:expr, $what:expr, $op:expr) => {{
        let policy: &$crate::retry::RetryPolicy = &$policy;
        let mut attempt: u32 = 1;
        loop {
            match $op.await {
                Ok(value) => break Ok(value),
                Err(err) if err.is_transient() && policy.allows_retry(attempt) => {
                    let delay = policy.backoff(attempt);
                    tracing::debug!(
                        what = $what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying transient UI failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        }
    }};
}

pub(crate) use retry_transient;
