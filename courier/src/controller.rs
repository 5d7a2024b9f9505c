use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use courier_common::{internal, logging, tracing};
use courier_delivery::{
    CircuitBreakerConfig, DispatchConfig, DispatchEngine, ProviderConfig, ProviderPool,
    RateLimitConfig, RetryPolicy, default_providers,
};
use courier_store::StoreConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::api::{self, ApiServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

/// Top-level configuration, read from `courier.config.ron`
#[derive(Debug, Deserialize)]
pub struct Courier {
    /// Address the HTTP API listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Upper bound on how long an API request may take (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Providers in fallback order; the first is the primary
    #[serde(default = "default_providers", alias = "provider")]
    pub providers: Vec<ProviderConfig>,
}

fn default_listen_address() -> String {
    "[::]:3000".to_string()
}

const fn default_request_timeout_ms() -> u64 {
    120_000
}

impl Default for Courier {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            request_timeout_ms: default_request_timeout_ms(),
            store: StoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            providers: default_providers(),
        }
    }
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

impl Courier {
    /// Build the dispatch engine described by this configuration
    ///
    /// # Errors
    ///
    /// If the store cannot be opened, or the providers or retry policy are
    /// invalid.
    pub async fn engine(&self) -> anyhow::Result<DispatchEngine> {
        let store = self.store.open().await?;
        let providers = ProviderPool::from_config(&self.providers)?;

        internal!(level = INFO, "Providers (in order): {:?}", providers.ids());

        let engine = DispatchEngine::new(
            store,
            providers,
            DispatchConfig {
                rate_limit: self.rate_limit,
                circuit_breaker: self.circuit_breaker.clone(),
                retry: self.retry.clone(),
            },
        )?;

        Ok(engine)
    }

    /// Run the dispatcher and its API until shutdown
    ///
    /// # Errors
    ///
    /// This function will return an error if the engine cannot be built, the
    /// API cannot bind, or the server fails while running.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let engine = Arc::new(self.engine().await?);
        let router = api::router(engine, Duration::from_millis(self.request_timeout_ms));
        let server = ApiServer::bind(&self.listen_address, router).await?;

        internal!(level = INFO, "Controller running");

        let mut server = tokio::spawn(server.serve(SHUTDOWN_BROADCAST.subscribe()));

        let ret = tokio::select! {
            r = &mut server => r?.map_err(anyhow::Error::from),
            r = shutdown() => {
                r?;
                // Let in-flight requests finish
                server.await?.map_err(anyhow::Error::from)
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}
