//! # Bounded Retry
//!
//! Exponential backoff with optional jitter for outbound collaborator calls. Dispatch
//! retries are bounded: once the budget is spent the error is surfaced so a dropped
//! subtree shows up as a job timeout instead of silent success.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clients::{InvokerError, ObjectStoreError};

/// Errors that know whether a retry may help
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for InvokerError {
    fn is_transient(&self) -> bool {
        InvokerError::is_transient(self)
    }
}

impl Retryable for ObjectStoreError {
    fn is_transient(&self) -> bool {
        ObjectStoreError::is_transient(self)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; zero is treated as one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.max(1.0).powi(exponent);
        let max = Duration::from_millis(self.max_delay_ms);

        let scale = |duration: Duration, factor: f64| {
            Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(max)
        };

        let delay = scale(base, multiplier);
        let jittered = if self.jitter {
            let jitter = fastrand::f64() * 0.1;
            scale(delay, 1.0 + jitter)
        } else {
            delay
        };

        jittered.min(max)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt budget runs out.
///
/// The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = %operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "🔁 Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
