//! Poll-until-settled primitive for eventually consistent providers

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Fixed-interval polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Pause between evaluations (milliseconds)
    pub interval_ms: u64,
    /// Evaluations before giving up
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Create a policy
    pub const fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts,
        }
    }

    /// Interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Re-fetch state until `is_satisfied` holds
///
/// Performs at most `policy.max_attempts` fetch/predicate evaluations and
/// sleeps only between them. Fetch errors are returned as-is. Exhausting
/// the budget yields [`Error::ConvergenceTimeout`] and a cancelled token
/// yields [`Error::Cancelled`].
pub async fn poll_until<T, F, Fut, P>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut fetch: F,
    mut is_satisfied: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&T) -> bool,
{
    let attempts = policy.max_attempts;
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let state = fetch().await?;
        if is_satisfied(&state) {
            debug!("{} settled after {} attempt(s)", what, attempt);
            return Ok(state);
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(policy.interval()) => {}
            }
        }
    }

    Err(Error::ConvergenceTimeout {
        what: what.to_string(),
        attempts,
    })
}
