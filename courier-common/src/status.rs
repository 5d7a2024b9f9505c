use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Lifecycle state of a [`MessageRecord`](crate::MessageRecord)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Accepted and owned by exactly one in-flight dispatch
    Pending,
    /// Delivered by the primary provider
    Sent,
    /// Every provider was exhausted, or the dispatch hit an unexpected error
    Failed,
    /// Refused admission by the rate limiter
    RateLimited,
    /// Delivered by a provider other than the primary
    FallbackUsed,
}

impl MessageStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Sent,
        Self::Failed,
        Self::RateLimited,
        Self::FallbackUsed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::FallbackUsed => "FALLBACK_USED",
        }
    }

    /// A new submission with the same id may take this record back to `Pending`
    #[must_use]
    pub const fn is_resubmittable(self) -> bool {
        matches!(self, Self::Failed | Self::RateLimited)
    }

    /// Forward-only transition rules.
    ///
    /// `Pending -> Pending` is not allowed: of several concurrent
    /// resubmissions only the first may reclaim a failed record.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => !matches!(next, Self::Pending),
            Self::Failed | Self::RateLimited => matches!(next, Self::Pending | Self::Failed),
            Self::Sent | Self::FallbackUsed => false,
        }
    }
}

impl Display for MessageStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown message status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for MessageStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Result of a status query: either the stored status or `NOT_FOUND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLookup {
    Known(MessageStatus),
    NotFound,
}

impl StatusLookup {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Known(status) => status.as_str(),
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl From<Option<MessageStatus>> for StatusLookup {
    fn from(status: Option<MessageStatus>) -> Self {
        status.map_or(Self::NotFound, Self::Known)
    }
}

impl Display for StatusLookup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusLookup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
