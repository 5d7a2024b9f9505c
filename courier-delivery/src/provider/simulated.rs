use std::time::Duration;

use async_trait::async_trait;
use courier_common::{ProviderId, outgoing};
use rand::Rng;

use super::Provider;
use crate::error::ProviderError;

/// Provider that delivers nowhere and fails at random
///
/// Each attempt waits `latency`, then succeeds with probability
/// `success_rate`, clamped to `0.0..=1.0`. A NaN rate never succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    id: ProviderId,
    success_rate: f64,
    latency: Duration,
}

impl SimulatedProvider {
    pub fn new(id: impl Into<ProviderId>, success_rate: f64, latency: Duration) -> Self {
        Self {
            id: id.into(),
            success_rate: if success_rate.is_nan() {
                0.0
            } else {
                success_rate.clamp(0.0, 1.0)
            },
            latency,
        }
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn attempt_send(
        &self,
        recipient: &str,
        _subject: &str,
        _body: &str,
    ) -> Result<(), ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if rand::rng().random_bool(self.success_rate) {
            outgoing!(level = DEBUG, "[{}] Email sent to {}", self.id, recipient);
            Ok(())
        } else {
            outgoing!(level = DEBUG, "[{}] Failed to send email to {}", self.id, recipient);
            Err(ProviderError::failure(
                &self.id,
                format!("{} failed to send email", self.id),
            ))
        }
    }
}
