//! Typed error handling for dispatch operations.
//!
//! - [`ProviderError`]: a single provider attempt failed. These are absorbed
//!   by retries and fallback and never reach the caller directly.
//! - [`DispatchError`]: what a caller of
//!   [`DispatchEngine::dispatch`](crate::DispatchEngine::dispatch) sees.
//! - [`ConfigurationError`]: the engine could not be built.

use std::time::Duration;

use courier_common::{MessageStatus, ProviderId};
use courier_store::StoreError;
use thiserror::Error;

/// Failure of one attempt against one provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The attempt did not finish within the per-attempt timeout.
    #[error("Provider {provider} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        provider: ProviderId,
        timeout: Duration,
    },

    /// The provider reported a failure.
    #[error("Provider {provider} failed: {reason}")]
    Failure { provider: ProviderId, reason: String },
}

impl ProviderError {
    pub fn failure(provider: &ProviderId, reason: impl Into<String>) -> Self {
        Self::Failure {
            provider: provider.clone(),
            reason: reason.into(),
        }
    }

    pub const fn provider(&self) -> &ProviderId {
        match self {
            Self::Timeout { provider, .. } | Self::Failure { provider, .. } => provider,
        }
    }

    /// Returns `true` if this attempt timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Error returned to callers of the dispatch engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Admission denied; the record is marked `RATE_LIMITED`.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Every provider failed or was skipped; the record is marked `FAILED`.
    #[error("All providers failed")]
    AllProvidersFailed {
        /// Last failure observed, if any provider was attempted at all
        last: Option<ProviderError>,
    },

    /// The message store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Returns `true` if the caller may succeed by resubmitting later.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::AllProvidersFailed { .. })
    }

    /// Returns `true` if this is an infrastructure failure.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns `true` if the record already reflects this failure.
    ///
    /// Only errors for which this is `false` trigger the best-effort
    /// `FAILED` write.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        !self.is_system()
    }
}

/// Invalid engine setup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("At least one provider is required")]
    NoProviders,

    #[error("Duplicate provider id: {0}")]
    DuplicateProvider(ProviderId),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Successful result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered by the primary provider.
    Sent { provider: ProviderId },
    /// Delivered by a fallback provider.
    FallbackUsed { provider: ProviderId },
    /// The id was already pending or delivered; nothing was sent.
    Duplicate { status: MessageStatus },
}

impl DispatchOutcome {
    /// Status of the record after this dispatch
    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        match self {
            Self::Sent { .. } => MessageStatus::Sent,
            Self::FallbackUsed { .. } => MessageStatus::FallbackUsed,
            Self::Duplicate { status } => *status,
        }
    }

    /// Returns `true` if this dispatch invoked a provider successfully.
    #[must_use]
    pub const fn delivered(&self) -> bool {
        !matches!(self, Self::Duplicate { .. })
    }
}
