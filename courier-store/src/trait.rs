use async_trait::async_trait;
use courier_common::MessageRecord;

use crate::{CreateOutcome, RecordUpdate};

/// Durable message state, keyed by the caller's idempotency id.
///
/// Implementations must make [`create_if_absent`](Self::create_if_absent)
/// atomic: of any number of concurrent callers inserting the same id,
/// exactly one observes [`CreateOutcome::Created`]. Partial updates must
/// be applied atomically per id and must reject backwards status moves
/// (see [`RecordUpdate::apply`]).
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Look up a record. Absence is `Ok(None)`, not an error.
    ///
    /// # Errors
    /// If the store cannot be read
    async fn find_by_id(&self, id: &str) -> crate::Result<Option<MessageRecord>>;

    /// Insert `record` unless a record with the same id exists.
    ///
    /// # Errors
    /// If the store cannot be written
    async fn create_if_absent(&self, record: &MessageRecord) -> crate::Result<CreateOutcome>;

    /// Apply `update` to an existing record and return the result.
    ///
    /// # Errors
    /// `NotFound` if there is no such record, `InvalidTransition` if the
    /// status change is not allowed, or an infrastructure error
    async fn update_partial(&self, id: &str, update: &RecordUpdate)
    -> crate::Result<MessageRecord>;

    /// Apply `update`, first creating a minimal `FAILED` record if none
    /// exists. Used on error paths where the initial create may never have
    /// happened.
    ///
    /// # Errors
    /// `InvalidTransition` if an existing record may not take the update,
    /// or an infrastructure error
    async fn upsert_on_failure(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> crate::Result<MessageRecord>;
}
