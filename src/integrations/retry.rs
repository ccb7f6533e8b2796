//! Bounded retry for inference calls
//!
//! A failed call is tried again after an exponentially growing, jittered
//! delay until the attempt budget is spent. Errors may carry their own delay
//! (a rate limit) which replaces the computed one for that attempt.

use crate::config::RuntimeConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget and backoff curve
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, counting the first
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Stretch each delay by up to 25%
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy for one processing step, read from its config snapshot
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            attempts: config.max_inference_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry.max_backoff_ms),
            multiplier: config.retry.multiplier,
            jitter: config.retry.jitter,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based)
    ///
    /// A hint from the error wins over the curve but is still capped.
    pub fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_backoff);
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::thread_rng().gen_range(1.0..1.25)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Errors that may say how long to wait before the next attempt
pub trait RetryHint {
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Every attempt failed; `error` is the last one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Run `call` until it succeeds or the policy's attempts are used up
///
/// `call` receives the 1-based attempt number.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryHint + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match call(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt >= policy.attempts => {
                warn!(operation, attempts = attempt, error = %error, "Giving up");
                return Err(Exhausted {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                let delay = policy.delay_after(attempt, error.retry_after());
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
