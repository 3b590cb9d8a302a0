//! Bounded exponential-backoff retry for throttled provider calls
//!
//! Providers never retry on their own; every external call the reconciler
//! makes goes through [`RetryingCaller`]. Only errors the classifier accepts
//! (by default [`Error::is_throttled`]) are retried, everything else is
//! returned untouched on the first failure.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Hard cap on attempts, including the first (0 is treated as 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative jitter applied to each delay (0.2 = ±20%)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts, no growth and no jitter
    pub fn fixed(delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            jitter_factor: 0.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed)
    ///
    /// `min(base * 2^(attempt - 1), max) * (1 ± jitter)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_delay_ms
        } else {
            self.base_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(self.max_delay_ms)
        };

        if self.jitter_factor <= 0.0 || delay == 0 {
            return Duration::from_millis(delay);
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let range = (delay as f64) * self.jitter_factor;
            let jitter: f64 = rand::rng().random_range(-range..=range);
            ((delay as f64) + jitter).max(0.0) as u64
        };
        Duration::from_millis(jittered)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Wraps external invocations with bounded retry
///
/// Only wrap operations that are safe to repeat (create-if-absent, deletes,
/// reads); a throttled response means the call had no effect.
#[derive(Debug, Clone)]
pub struct RetryingCaller {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryingCaller {
    /// Create a caller bound to a cancellation token
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// The active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying while it reports throttling
    pub async fn call<T, F, Fut>(&self, what: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call_with(what, &self.policy, Error::is_throttled, operation)
            .await
    }

    /// Run `operation` under `policy`, retrying every error `retryable` accepts
    pub async fn call_with<T, F, Fut, C>(
        &self,
        what: &str,
        policy: &RetryPolicy,
        retryable: C,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let max_attempts = policy.attempts();
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    debug!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, max_attempts, e, delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if retryable(&e) {
                        warn!("{} still failing after {} attempts: {}", what, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(1, max_attempts)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_factor: 0.2,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis();
            assert!((800..=1_200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test]
    async fn retries_throttled_until_success() {
        let caller = RetryingCaller::new(quick(5), CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result = caller
            .call("list zones", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::throttled("slow down"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_at_hard_cap() {
        let caller = RetryingCaller::new(quick(4), CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result: Result<()> = caller
            .call("create route", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::throttled("slow down"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_throttled());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn other_errors_surface_immediately() {
        let caller = RetryingCaller::new(quick(5), CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result: Result<()> = caller
            .call("get domain", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::provider("mock", "boom"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Provider { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let caller = RetryingCaller::new(quick(0), CancellationToken::new());
        let result = caller.call("noop", || async { Ok::<_, Error>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let caller = RetryingCaller::new(RetryPolicy::fixed(60_000, 5), cancel.clone());
        cancel.cancel();

        let result: Result<()> = caller
            .call("list routes", || async { Err(Error::throttled("slow down")) })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
