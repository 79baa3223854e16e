//! Exponential backoff for rate-limited probes.
//!
//! Only rate limiting is retried. The caller decides which outcomes count as
//! rate limited through a predicate, so the loop stays agnostic of the probe
//! transport.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Fraction of each delay that may be shaved off at random, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero based), without jitter.
    ///
    /// ## Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use scout_lib::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.base_delay(0), Duration::from_secs(1));
    /// assert_eq!(policy.base_delay(2), Duration::from_secs(4));
    /// assert_eq!(policy.base_delay(10), Duration::from_secs(30));
    /// ```
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(64) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Delay before retry number `retry`, with up to `jitter` of it removed.
    ///
    /// Jitter only shortens the delay, so the cap is never exceeded.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        base.mul_f64(1.0 - rand::random::<f64>() * jitter)
    }
}

/// Runs `operation` until it returns a value `is_rate_limited` rejects, or the
/// retry budget is spent.
///
/// Returns the final value along with the number of attempts made. When every
/// attempt was rate limited, the last rate-limited value is returned and the
/// caller decides how to report it.
///
/// ## Arguments
///
/// * `policy` - backoff schedule and retry budget
/// * `label` - identifies the operation in log output
/// * `operation` - the attempt to run, callable repeatedly
/// * `is_rate_limited` - classifies an attempt's result
pub async fn with_backoff<F, Fut, T, P>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
    is_rate_limited: P,
) -> (T, u32)
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let mut retry = 0;
    loop {
        let outcome = operation().await;
        if !is_rate_limited(&outcome) || retry >= policy.max_retries {
            return (outcome, retry + 1);
        }

        let delay = policy.delay_for(retry);
        warn!(
            operation = label,
            retry = retry + 1,
            delay_ms = delay.as_millis() as u64,
            "rate limited, backing off"
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
