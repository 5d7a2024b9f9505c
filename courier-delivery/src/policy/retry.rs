//! Retry policy for provider attempts.
//!
//! Runs one provider's send up to `max_attempts` times. Each attempt is
//! raced against `attempt_timeout_ms`. Between attempts the task sleeps for
//! an exponentially growing, capped delay:
//!
//! `delay = min(initial * 2^(attempt - 1), max_delay) * (1 ± jitter)`
//!
//! A timed-out attempt counts as a failed attempt and is retried like any
//! other failure.

use std::{future::Future, time::Duration};

use courier_common::{ProviderId, tracing};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, ProviderError};

/// Retry policy configuration for provider attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per provider before falling back.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds). Doubles after each
    /// further failure.
    ///
    /// Default: 1000
    #[serde(default = "defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling for the backoff delay (milliseconds).
    ///
    /// Default: 30000
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Hard limit on a single attempt (milliseconds).
    ///
    /// Default: 5000
    #[serde(default = "defaults::attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Delays are randomized within ±`jitter_factor`.
    ///
    /// Default: 0.0
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            initial_delay_ms: defaults::initial_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            attempt_timeout_ms: defaults::attempt_timeout_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

/// All attempts against a provider failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError {
    /// Number of attempts made
    pub attempts: u32,
    /// Failure of the final attempt
    pub last: ProviderError,
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// If `max_attempts` is zero or `jitter_factor` is outside `0.0..=1.0`
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.jitter_factor",
                reason: format!("{} is outside 0.0..=1.0", self.jitter_factor),
            });
        }

        Ok(())
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay to wait after the `attempt`-th failure (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
        )
    }

    /// Run `attempt_fn` until it succeeds or attempts run out.
    ///
    /// # Errors
    /// The last attempt's failure, with the number of attempts made
    pub async fn execute<T, F, Fut>(
        &self,
        provider: &ProviderId,
        mut attempt_fn: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let max_attempts = self.max_attempts.max(1);
        let timeout = self.attempt_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match tokio::time::timeout(timeout, attempt_fn()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    provider: provider.clone(),
                    timeout,
                },
            };

            tracing::warn!(
                provider = %provider,
                attempt,
                max_attempts,
                error = %error,
                "Provider attempt failed"
            );

            if attempt >= max_attempts {
                return Err(RetryError {
                    attempts: attempt,
                    last: error,
                });
            }

            tokio::time::sleep(self.delay_for(attempt)).await;
        }
    }
}

/// Exponential backoff with a ceiling and jitter.
///
/// `attempt` is 1-indexed: the first retry waits `initial_delay_ms`.
pub fn calculate_backoff(
    attempt: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_ms
    } else {
        initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(max_delay_ms)
    };

    if jitter_factor <= 0.0 {
        return Duration::from_millis(delay);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered = {
        let jitter_range = (delay as f64) * jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    };

    Duration::from_millis(jittered)
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn initial_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_delay_ms() -> u64 {
        30_000
    }

    pub const fn attempt_timeout_ms() -> u64 {
        5_000
    }

    pub const fn jitter_factor() -> f64 {
        0.0
    }
}
