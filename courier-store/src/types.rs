use courier_common::{MessageRecord, MessageStatus, ProviderId};

use crate::StoreError;

/// Outcome of [`MessageStore::create_if_absent`](crate::MessageStore::create_if_absent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This caller's record was inserted
    Created,
    /// A record with the same id was already present; nothing was written
    AlreadyExists,
}

/// A partial update to a [`MessageRecord`].
///
/// Fields left unset are untouched. `error_message` distinguishes "leave
/// as is" (`None`) from "clear" (`Some(None)`).
///
/// `only_from` makes the whole update conditional on the record's current
/// status; a record in any other status is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: Option<MessageStatus>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub provider_used: Option<ProviderId>,
    pub error_message: Option<Option<String>>,
    pub retry_increment: u32,
    pub only_from: Option<&'static [MessageStatus]>,
}

impl RecordUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn payload(mut self, subject: impl Into<String>, body: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn provider_used(mut self, provider: ProviderId) -> Self {
        self.provider_used = Some(provider);
        self
    }

    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    #[must_use]
    pub fn increment_retry_count(mut self, by: u32) -> Self {
        self.retry_increment = self.retry_increment.saturating_add(by);
        self
    }

    /// Apply only if the record is currently in one of `statuses`
    #[must_use]
    pub const fn only_from(mut self, statuses: &'static [MessageStatus]) -> Self {
        self.only_from = Some(statuses);
        self
    }

    /// Apply this update to `record`, enforcing forward-only status transitions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] without modifying the record
    /// if the requested status change is not allowed, or the record is not in
    /// one of the `only_from` statuses.
    pub fn apply(&self, record: &mut MessageRecord) -> Result<(), StoreError> {
        if let Some(allowed) = self.only_from
            && !allowed.contains(&record.status)
        {
            return Err(StoreError::InvalidTransition {
                id: record.id.clone(),
                from: record.status,
                to: self.status.unwrap_or(record.status),
            });
        }
        if let Some(next) = self.status {
            if !record.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: record.id.clone(),
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
        }
        if let Some(subject) = &self.subject {
            record.subject.clone_from(subject);
        }
        if let Some(body) = &self.body {
            record.body.clone_from(body);
        }
        if let Some(provider) = &self.provider_used {
            record.provider_used = Some(provider.clone());
        }
        if let Some(error) = &self.error_message {
            record.error_message.clone_from(error);
        }
        record.retry_count = record.retry_count.saturating_add(self.retry_increment);

        Ok(())
    }
}
