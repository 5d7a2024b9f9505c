//! Persisted message model

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{MessageStatus, ProviderId};

/// A submission to dispatch a message, keyed by the caller's idempotency id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl DispatchRequest {
    pub fn new(
        id: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Durable state of one logical message.
///
/// At most one record exists per `id`; stores enforce this on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: MessageStatus,
    /// Failed provider attempts plus resubmissions; never decreases
    pub retry_count: u32,
    /// Provider that delivered the message, once delivered
    pub provider_used: Option<ProviderId>,
    /// Last failure reason, cleared on resubmission
    pub error_message: Option<String>,
    pub created_at: SystemTime,
}

impl MessageRecord {
    /// A fresh `Pending` record for a first-time submission
    #[must_use]
    pub fn pending(request: &DispatchRequest) -> Self {
        Self {
            id: request.id.clone(),
            recipient: request.recipient.clone(),
            subject: request.subject.clone(),
            body: request.body.clone(),
            status: MessageStatus::Pending,
            retry_count: 0,
            provider_used: None,
            error_message: None,
            created_at: SystemTime::now(),
        }
    }

    /// Minimal `Failed` record for an id whose initial creation never landed
    #[must_use]
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            recipient: String::new(),
            subject: String::new(),
            body: String::new(),
            status: MessageStatus::Failed,
            retry_count: 0,
            provider_used: None,
            error_message: Some(error.into()),
            created_at: SystemTime::now(),
        }
    }
}
