//! Scripted providers and engine builders for dispatch tests
#![allow(dead_code)] // Not every test uses every helper

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_common::{MessageRecord, ProviderId};
use courier_delivery::{
    CircuitBreakerConfig, DispatchConfig, DispatchEngine, Provider, ProviderError, ProviderPool,
    RateLimitConfig, RetryPolicy,
};
use courier_store::MessageStore;
use parking_lot::Mutex;

/// What a scripted provider does on each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    /// Never answers within any reasonable timeout
    Hang,
}

/// Provider whose outcome is set by the test
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    failing: AtomicBool,
    hang: bool,
    calls: AtomicUsize,
    observer: Mutex<Option<Observer>>,
}

#[derive(Debug)]
struct Observer {
    store: Arc<dyn MessageStore>,
    seen: Vec<MessageRecord>,
}

impl ScriptedProvider {
    pub fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            failing: AtomicBool::new(behaviour == Behaviour::Fail),
            hang: behaviour == Behaviour::Hang,
            calls: AtomicUsize::new(0),
            observer: Mutex::new(None),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Snapshot the record for each attempt's recipient from `store`
    pub fn observe(&self, store: Arc<dyn MessageStore>) {
        *self.observer.lock() = Some(Observer {
            store,
            seen: Vec::new(),
        });
    }

    /// Records observed at the start of each attempt
    pub fn seen(&self) -> Vec<MessageRecord> {
        self.observer
            .lock()
            .as_ref()
            .map(|o| o.seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn attempt_send(
        &self,
        recipient: &str,
        _subject: &str,
        _body: &str,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let store = self.observer.lock().as_ref().map(|o| o.store.clone());
        if let Some(store) = store {
            // Tests observing records use the recipient as the message id
            if let Some(record) = store.find_by_id(recipient).await.unwrap() {
                if let Some(observer) = self.observer.lock().as_mut() {
                    observer.seen.push(record);
                }
            }
        }

        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            Err(ProviderError::failure(&self.id, format!("{} failed to send email", self.id)))
        } else {
            Ok(())
        }
    }
}

/// Fast, deterministic engine settings
pub fn config() -> DispatchConfig {
    DispatchConfig {
        rate_limit: RateLimitConfig {
            capacity: 1_000,
            refill_interval_ms: 60_000,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_ms: 60_000,
            provider_overrides: ahash::AHashMap::default(),
        },
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 5_000,
            jitter_factor: 0.0,
        },
    }
}

pub fn engine(
    store: Arc<dyn MessageStore>,
    providers: &[Arc<ScriptedProvider>],
    config: DispatchConfig,
) -> DispatchEngine {
    let pool = ProviderPool::new(
        providers
            .iter()
            .map(|p| p.clone() as Arc<dyn Provider>)
            .collect(),
    )
    .expect("valid provider pool");

    DispatchEngine::new(store, pool, config).expect("valid engine config")
}
