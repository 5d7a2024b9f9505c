//! Delivery providers and the ordered pool the engine walks
//!
//! A provider exposes one capability, [`Provider::attempt_send`], and carries
//! no retry or timeout logic of its own. The [`ProviderPool`] fixes the
//! order: the first provider is the primary, the rest are fallbacks.

mod simulated;

use std::{fmt::Debug, sync::Arc};

use ahash::AHashSet;
use async_trait::async_trait;
use courier_common::ProviderId;
use serde::{Deserialize, Serialize};

pub use simulated::SimulatedProvider;

use crate::error::{ConfigurationError, ProviderError};

#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Stable identity, used to key the provider's circuit breaker
    fn id(&self) -> &ProviderId;

    /// Make a single delivery attempt
    ///
    /// # Errors
    /// If the provider rejects or fails to deliver the message
    async fn attempt_send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ProviderError>;
}

/// Ordered, non-empty set of providers with unique ids
#[derive(Debug, Clone)]
pub struct ProviderPool {
    providers: Arc<[Arc<dyn Provider>]>,
}

impl ProviderPool {
    /// # Errors
    /// If `providers` is empty or two providers share an id
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self, ConfigurationError> {
        if providers.is_empty() {
            return Err(ConfigurationError::NoProviders);
        }

        let mut seen = AHashSet::with_capacity(providers.len());
        for provider in &providers {
            if !seen.insert(provider.id().clone()) {
                return Err(ConfigurationError::DuplicateProvider(provider.id().clone()));
            }
        }

        Ok(Self {
            providers: providers.into(),
        })
    }

    /// Build the configured providers, in order.
    ///
    /// # Errors
    /// If any provider config is invalid, or the pool would be invalid
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self, ConfigurationError> {
        let providers = configs
            .iter()
            .map(ProviderConfig::build)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(providers)
    }

    /// The first provider in order
    pub fn primary(&self) -> &Arc<dyn Provider> {
        &self.providers[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Always `false`; a pool cannot be constructed empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id().clone()).collect()
    }
}

/// Configured provider variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderConfig {
    /// Stand-in transport that succeeds with probability `success_rate`
    Simulated {
        name: String,
        #[serde(default = "default_success_rate")]
        success_rate: f64,
        #[serde(default)]
        latency_ms: u64,
    },
}

const fn default_success_rate() -> f64 {
    1.0
}

impl ProviderConfig {
    /// # Errors
    /// If the variant's parameters are out of range
    pub fn build(&self) -> Result<Arc<dyn Provider>, ConfigurationError> {
        match self {
            Self::Simulated {
                name,
                success_rate,
                latency_ms,
            } => {
                if !(0.0..=1.0).contains(success_rate) {
                    return Err(ConfigurationError::InvalidValue {
                        field: "providers.success_rate",
                        reason: format!("{success_rate} for {name} is outside 0.0..=1.0"),
                    });
                }

                Ok(Arc::new(SimulatedProvider::new(
                    name.as_str(),
                    *success_rate,
                    std::time::Duration::from_millis(*latency_ms),
                )))
            }
        }
    }
}

/// The pair of providers a fresh deployment starts with
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::Simulated {
            name: "ProviderA".to_string(),
            success_rate: 0.7,
            latency_ms: 0,
        },
        ProviderConfig::Simulated {
            name: "ProviderB".to_string(),
            success_rate: 0.9,
            latency_ms: 0,
        },
    ]
}
