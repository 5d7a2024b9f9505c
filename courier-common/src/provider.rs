//! Provider identity newtype
//!
//! Circuit breakers and outcome records are keyed by the provider's
//! configured name. Wrapping it keeps provider names from being mixed up
//! with message ids or recipients.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// Stable identifier of a delivery provider
///
/// # Examples
///
/// ```
/// use courier_common::ProviderId;
///
/// let id = ProviderId::new("primary");
/// assert_eq!(id.as_str(), "primary");
///
/// let id: ProviderId = "fallback".into();
/// assert_eq!(id.as_str(), "fallback");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ProviderId(Arc<str>);

impl ProviderId {
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProviderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ProviderId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&ProviderId> for String {
    fn from(id: &ProviderId) -> Self {
        id.0.to_string()
    }
}
