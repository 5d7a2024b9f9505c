use courier_common::{
    DispatchRequest, MessageRecord, MessageStatus, ProviderId, internal, tracing,
};
use courier_store::{CreateOutcome, RecordUpdate, StoreError};

use super::DispatchEngine;
use crate::{
    error::{DispatchError, DispatchOutcome},
    policy::RetryError,
};

const RATE_LIMITED_REASON: &str = "Rate limit exceeded";
const ALL_PROVIDERS_FAILED_REASON: &str = "All providers failed";

/// Statuses a dispatch may overwrite without having claimed the record
const UNOWNED_OVERWRITABLE: &[MessageStatus] = &[MessageStatus::Failed, MessageStatus::RateLimited];

/// Result of trying to take ownership of an id
enum Claim {
    /// This request owns the record and should deliver it
    Owned(MessageRecord),
    /// Another request already owns or delivered it
    Duplicate(MessageStatus),
}

impl DispatchEngine {
    /// Deliver `request` at most once per id.
    ///
    /// Returns [`DispatchOutcome::Duplicate`] without sending if the id is
    /// already pending or delivered.
    ///
    /// # Errors
    /// - [`DispatchError::RateLimitExceeded`]: no token was available; the
    ///   record is `RATE_LIMITED`
    /// - [`DispatchError::AllProvidersFailed`]: every provider failed or was
    ///   skipped; the record is `FAILED`
    /// - [`DispatchError::Store`]: the store failed; a `FAILED` record is
    ///   written on a best-effort basis
    #[tracing::instrument(level = "info", skip_all, fields(message_id = %request.id))]
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let record = match self.claim(request).await {
            Ok(Claim::Owned(record)) => record,
            Ok(Claim::Duplicate(status)) => {
                internal!(
                    level = INFO,
                    "Message {} already sent or in progress (status={})",
                    request.id,
                    status
                );
                return Ok(DispatchOutcome::Duplicate { status });
            }
            Err(e) => {
                self.handle_failure(&request.id, &e, false).await;
                return Err(e);
            }
        };

        let result = self.process(&record).await;
        if let Err(e) = &result {
            self.handle_failure(&record.id, e, true).await;
        }

        result
    }

    async fn process(&self, record: &MessageRecord) -> Result<DispatchOutcome, DispatchError> {
        self.admit(&record.id).await?;
        self.deliver(record).await
    }

    async fn handle_failure(&self, id: &str, error: &DispatchError, owned: bool) {
        if error.is_recorded() {
            tracing::info!(error = %error, "Dispatch failed");
        } else {
            tracing::error!(error = %error, "Unexpected error during dispatch");
            self.record_unexpected_failure(id, error, owned).await;
        }
    }

    async fn claim(&self, request: &DispatchRequest) -> Result<Claim, DispatchError> {
        let Some(existing) = self.store.find_by_id(&request.id).await? else {
            let record = MessageRecord::pending(request);
            return match self.store.create_if_absent(&record).await? {
                CreateOutcome::Created => Ok(Claim::Owned(record)),
                // A concurrent request created it between our lookup and insert
                CreateOutcome::AlreadyExists => Ok(Claim::Duplicate(MessageStatus::Pending)),
            };
        };

        if !existing.status.is_resubmittable() {
            return Ok(Claim::Duplicate(existing.status));
        }

        internal!(
            level = INFO,
            "Retrying previously failed message {} (status={})",
            request.id,
            existing.status
        );

        let update = RecordUpdate::new()
            .status(MessageStatus::Pending)
            .payload(request.subject.as_str(), request.body.as_str())
            .clear_error()
            .increment_retry_count(1);

        match self.store.update_partial(&request.id, &update).await {
            Ok(record) => Ok(Claim::Owned(record)),
            // Another resubmission moved it out of FAILED/RATE_LIMITED first
            Err(StoreError::InvalidTransition { from, .. }) => Ok(Claim::Duplicate(from)),
            Err(e) => Err(e.into()),
        }
    }

    async fn admit(&self, id: &str) -> Result<(), DispatchError> {
        if self.rate_limiter.try_acquire() {
            return Ok(());
        }

        self.store
            .update_partial(
                id,
                &RecordUpdate::new()
                    .status(MessageStatus::RateLimited)
                    .error(RATE_LIMITED_REASON),
            )
            .await?;

        Err(DispatchError::RateLimitExceeded)
    }

    async fn deliver(&self, record: &MessageRecord) -> Result<DispatchOutcome, DispatchError> {
        let mut last_error = None;

        for (index, provider) in self.providers.iter().enumerate() {
            let provider_id = provider.id();

            if !self.circuit_breaker.can_attempt(provider_id) {
                tracing::warn!(provider = %provider_id, "Circuit breaker OPEN, skipping provider");
                continue;
            }

            internal!("Trying provider {} for message {}", provider_id, record.id);

            let result = self
                .retry
                .execute(provider_id, || {
                    provider.attempt_send(&record.recipient, &record.subject, &record.body)
                })
                .await;

            match result {
                Ok(()) => {
                    self.circuit_breaker.record_success(provider_id);
                    return self.record_delivery(&record.id, provider_id, index == 0).await;
                }
                Err(RetryError { attempts, last }) => {
                    self.circuit_breaker.record_failure(provider_id);
                    tracing::warn!(
                        provider = %provider_id,
                        attempts,
                        error = %last,
                        "Provider exhausted, falling back"
                    );

                    self.store
                        .update_partial(
                            &record.id,
                            &RecordUpdate::new().increment_retry_count(attempts),
                        )
                        .await?;
                    last_error = Some(last);
                }
            }
        }

        self.store
            .update_partial(
                &record.id,
                &RecordUpdate::new()
                    .status(MessageStatus::Failed)
                    .error(ALL_PROVIDERS_FAILED_REASON),
            )
            .await?;

        Err(DispatchError::AllProvidersFailed { last: last_error })
    }

    async fn record_delivery(
        &self,
        id: &str,
        provider: &ProviderId,
        primary: bool,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (status, outcome) = if primary {
            (
                MessageStatus::Sent,
                DispatchOutcome::Sent {
                    provider: provider.clone(),
                },
            )
        } else {
            (
                MessageStatus::FallbackUsed,
                DispatchOutcome::FallbackUsed {
                    provider: provider.clone(),
                },
            )
        };

        self.store
            .update_partial(
                id,
                &RecordUpdate::new()
                    .status(status)
                    .provider_used(provider.clone()),
            )
            .await?;

        tracing::info!(provider = %provider, status = %status, "Message delivered");
        Ok(outcome)
    }

    /// Mark `id` as `FAILED` after an error that left no trace in the store.
    ///
    /// Before this dispatch owns the record, only a missing, `FAILED` or
    /// `RATE_LIMITED` record may be written: a `PENDING` one belongs to
    /// another dispatch. Failures here are logged and otherwise ignored; the
    /// caller always sees the original error.
    async fn record_unexpected_failure(&self, id: &str, error: &DispatchError, owned: bool) {
        let mut update = RecordUpdate::new()
            .status(MessageStatus::Failed)
            .error(error.to_string());
        if !owned {
            update = update.only_from(UNOWNED_OVERWRITABLE);
        }

        match self.store.upsert_on_failure(id, &update).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    status = %from,
                    original = %error,
                    "Record not owned by this dispatch, left untouched"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    original = %error,
                    "Failed to record dispatch failure"
                );
            }
        }
    }
}
