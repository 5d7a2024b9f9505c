//! Outbound dispatch for courier
//!
//! This crate provides:
//! - The [`DispatchEngine`], which delivers each message id at most once
//! - A shared [`RateLimiter`] for admission control
//! - A per-provider [`CircuitBreaker`]
//! - A [`RetryPolicy`] with per-attempt timeouts and capped backoff
//! - The [`Provider`] capability and the ordered [`ProviderPool`]

pub mod circuit_breaker;
mod engine;
mod error;
pub mod policy;
pub mod provider;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use engine::{DispatchConfig, DispatchEngine};
pub use error::{ConfigurationError, DispatchError, DispatchOutcome, ProviderError};
pub use policy::{RetryError, RetryPolicy};
pub use provider::{Provider, ProviderConfig, ProviderPool, SimulatedProvider, default_providers};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
