//! Per-provider circuit breaker
//!
//! Stops the dispatcher from spending retries on a provider that keeps
//! failing. Each provider gets its own breaker, keyed by [`ProviderId`].
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_count >= threshold  ┌──────┐
//! │ Closed  │ ──────────────────────────>  │ Open │ <─────┐
//! └─────────┘                              └──────┘       │
//!     ^                                        │          │
//!     │                                        │ now >= next_attempt_at
//!     │                                        v          │
//!     │  Success              ┌───────────────┐  Failure  │
//!     └───────────────────────│  Half-Open    │───────────┘
//!                             └───────────────┘
//! ```
//!
//! Failures are counted until a success resets them; there is no sliding
//! window. Breaker state lives as long as the process.

use std::{sync::Arc, time::Duration};

use courier_common::{ProviderId, tracing};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe (milliseconds)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Per-provider overrides, keyed by provider id
    #[serde(default)]
    pub provider_overrides: ahash::AHashMap<String, ProviderCircuitBreakerConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            provider_overrides: ahash::AHashMap::default(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_cooldown_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Tripped, attempts are rejected until the cooldown passes
    Open,
    /// Cooldown passed, attempts are admitted to probe the provider
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreakerData {
    state: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    config: ProviderCircuitBreakerConfig,
}

impl CircuitBreakerData {
    const fn new(config: ProviderCircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            next_attempt_at: None,
            config,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.next_attempt_at = Some(Instant::now() + Duration::from_millis(self.config.cooldown_ms));
    }

    /// Returns `true` if the circuit transitioned to Open
    fn record_failure(&mut self, provider: &ProviderId) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);

        match self.state {
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.open();
                tracing::warn!(
                    provider = %provider,
                    failure_count = self.failure_count,
                    threshold = self.config.failure_threshold,
                    cooldown_ms = self.config.cooldown_ms,
                    "Circuit breaker OPENED - skipping provider until cooldown elapses"
                );
                true
            }
            CircuitState::HalfOpen => {
                self.open();
                tracing::warn!(
                    provider = %provider,
                    "Circuit breaker probe failed - reopening circuit"
                );
                true
            }
            CircuitState::Closed | CircuitState::Open => false,
        }
    }

    /// Returns `true` if the circuit transitioned to Closed
    fn record_success(&mut self, provider: &ProviderId) -> bool {
        let recovered = self.state != CircuitState::Closed;

        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.next_attempt_at = None;

        if recovered {
            tracing::info!(
                provider = %provider,
                "Circuit breaker CLOSED - normal operation resumed"
            );
        }
        recovered
    }

    fn can_attempt(&mut self, provider: &ProviderId) -> bool {
        match self.state {
            CircuitState::Open => {
                if self
                    .next_attempt_at
                    .is_some_and(|at| Instant::now() >= at)
                {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!(
                        provider = %provider,
                        "Circuit breaker entering HALF-OPEN state - probing provider"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => true,
        }
    }
}

/// Circuit breakers for every provider the dispatcher talks to
///
/// `can_attempt`, `record_success` and `record_failure` each hold the
/// provider's lock for their whole read-modify-write, so concurrent
/// dispatches never lose an update.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    breakers: DashMap<ProviderId, Arc<parking_lot::Mutex<CircuitBreakerData>>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn get_breaker(&self, provider: &ProviderId) -> Arc<parking_lot::Mutex<CircuitBreakerData>> {
        self.breakers
            .entry(provider.clone())
            .or_insert_with(|| {
                let config = self
                    .config
                    .provider_overrides
                    .get(provider.as_str())
                    .copied()
                    .unwrap_or(ProviderCircuitBreakerConfig {
                        failure_threshold: self.config.failure_threshold,
                        cooldown_ms: self.config.cooldown_ms,
                    });

                Arc::new(parking_lot::Mutex::new(CircuitBreakerData::new(config)))
            })
            .clone()
    }

    /// Whether `provider` may be tried now
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// admits the caller.
    pub fn can_attempt(&self, provider: &ProviderId) -> bool {
        self.get_breaker(provider).lock().can_attempt(provider)
    }

    /// Returns `true` if the circuit transitioned to Closed (recovered)
    pub fn record_success(&self, provider: &ProviderId) -> bool {
        self.get_breaker(provider).lock().record_success(provider)
    }

    /// Returns `true` if the circuit transitioned to Open (tripped)
    pub fn record_failure(&self, provider: &ProviderId) -> bool {
        self.get_breaker(provider).lock().record_failure(provider)
    }

    pub fn get_state(&self, provider: &ProviderId) -> CircuitState {
        self.get_breaker(provider).lock().state
    }

    pub fn get_stats(&self, provider: &ProviderId) -> CircuitBreakerStats {
        let breaker = self.get_breaker(provider);
        let guard = breaker.lock();
        CircuitBreakerStats {
            state: guard.state,
            failure_count: guard.failure_count,
            threshold: guard.config.failure_threshold,
            cooldown: Duration::from_millis(guard.config.cooldown_ms),
            next_attempt_at: guard.next_attempt_at,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub cooldown: Duration,
    /// When an open circuit will admit its next probe
    pub next_attempt_at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, cooldown_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            cooldown_ms,
            provider_overrides: ahash::AHashMap::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let breaker = CircuitBreaker::new(config(3, 60_000));
        let provider = ProviderId::new("ProviderA");

        assert_eq!(breaker.get_state(&provider), CircuitState::Closed);
        assert!(breaker.can_attempt(&provider));

        assert!(!breaker.record_failure(&provider));
        assert!(!breaker.record_failure(&provider));
        assert_eq!(breaker.get_state(&provider), CircuitState::Closed);

        assert!(breaker.record_failure(&provider));
        assert_eq!(breaker.get_state(&provider), CircuitState::Open);
        assert!(!breaker.can_attempt(&provider));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_cooldown_then_recovery() {
        let breaker = CircuitBreaker::new(config(3, 60_000));
        let provider = ProviderId::new("ProviderA");

        for _ in 0..3 {
            breaker.record_failure(&provider);
        }
        assert!(!breaker.can_attempt(&provider));

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert!(!breaker.can_attempt(&provider));
        assert_eq!(breaker.get_state(&provider), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.can_attempt(&provider));
        assert_eq!(breaker.get_state(&provider), CircuitState::HalfOpen);

        // Half-open keeps admitting while the probe is in flight
        assert!(breaker.can_attempt(&provider));

        assert!(breaker.record_success(&provider));
        let stats = breaker.get_stats(&provider);
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.next_attempt_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_failure_rearms() {
        let breaker = CircuitBreaker::new(config(2, 1_000));
        let provider = ProviderId::new("ProviderA");

        breaker.record_failure(&provider);
        breaker.record_failure(&provider);
        let first_deadline = breaker.get_stats(&provider).next_attempt_at.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.can_attempt(&provider));

        assert!(breaker.record_failure(&provider));
        let stats = breaker.get_stats(&provider);
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.next_attempt_at.unwrap() > first_deadline);
        assert!(!breaker.can_attempt(&provider));
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let breaker = CircuitBreaker::new(config(3, 60_000));
        let provider = ProviderId::new("ProviderA");

        breaker.record_failure(&provider);
        breaker.record_failure(&provider);
        assert!(!breaker.record_success(&provider));

        breaker.record_failure(&provider);
        breaker.record_failure(&provider);
        assert_eq!(breaker.get_state(&provider), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breakers_are_independent() {
        let breaker = CircuitBreaker::new(config(1, 60_000));
        let a = ProviderId::new("ProviderA");
        let b = ProviderId::new("ProviderB");

        breaker.record_failure(&a);
        assert_eq!(breaker.get_state(&a), CircuitState::Open);
        assert_eq!(breaker.get_state(&b), CircuitState::Closed);
        assert!(breaker.can_attempt(&b));
    }

    #[test]
    fn test_circuit_breaker_provider_override() {
        let mut config = config(3, 60_000);
        config.provider_overrides.insert(
            "Flaky".to_string(),
            ProviderCircuitBreakerConfig {
                failure_threshold: 1,
                cooldown_ms: 5_000,
            },
        );
        let breaker = CircuitBreaker::new(config);

        let flaky = ProviderId::new("Flaky");
        breaker.record_failure(&flaky);
        let stats = breaker.get_stats(&flaky);
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.threshold, 1);
        assert_eq!(stats.cooldown, Duration::from_secs(5));

        let stable = ProviderId::new("Stable");
        breaker.record_failure(&stable);
        assert_eq!(breaker.get_state(&stable), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_config_from_ron() {
        let config: CircuitBreakerConfig =
            ron::from_str("(failure_threshold: 5, provider_overrides: {\"B\": (failure_threshold: 1, cooldown_ms: 10)})")
                .unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown_ms, 60_000);
        assert_eq!(
            config.provider_overrides.get("B"),
            Some(&ProviderCircuitBreakerConfig {
                failure_threshold: 1,
                cooldown_ms: 10
            })
        );
    }
}
