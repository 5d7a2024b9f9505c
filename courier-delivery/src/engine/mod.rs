//! Dispatch engine
//!
//! Owns the shared admission and failure-isolation state and drives each
//! request through it:
//!
//! 1. **Claim**: create the record, or reset a failed one to `PENDING`.
//!    Ids that are already pending or delivered stop here.
//! 2. **Admit**: take a token from the [`RateLimiter`].
//! 3. **Deliver**: walk the [`ProviderPool`] in order, skipping providers
//!    whose circuit is open, retrying each under the [`RetryPolicy`].
//!
//! The store's create-if-absent is what keeps two concurrent requests for
//! the same id from both reaching step 3.

mod dispatch;

use std::sync::Arc;

use courier_common::StatusLookup;
use courier_store::MessageStore;
use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    error::{ConfigurationError, DispatchError},
    policy::RetryPolicy,
    provider::ProviderPool,
    rate_limiter::{RateLimitConfig, RateLimiter},
};

/// Tuning for the engine's shared state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug)]
pub struct DispatchEngine {
    store: Arc<dyn MessageStore>,
    providers: ProviderPool,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl DispatchEngine {
    /// Build an engine over `store` and `providers`.
    ///
    /// Must be called inside a Tokio runtime, as the rate limiter starts its
    /// refill task here.
    ///
    /// # Errors
    /// If the retry policy is invalid
    pub fn new(
        store: Arc<dyn MessageStore>,
        providers: ProviderPool,
        config: DispatchConfig,
    ) -> Result<Self, ConfigurationError> {
        config.retry.validate()?;

        Ok(Self {
            store,
            providers,
            rate_limiter: RateLimiter::new(config.rate_limit),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker),
            retry: config.retry,
        })
    }

    /// Current status of `id`, or [`StatusLookup::NotFound`]
    ///
    /// # Errors
    /// If the store fails
    pub async fn get_status(&self, id: &str) -> Result<StatusLookup, DispatchError> {
        Ok(self.store.find_by_id(id).await?.map(|r| r.status).into())
    }

    pub const fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub const fn providers(&self) -> &ProviderPool {
        &self.providers
    }

    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}
