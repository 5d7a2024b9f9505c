use std::sync::Arc;

use async_trait::async_trait;
use courier_common::MessageRecord;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{CreateOutcome, RecordUpdate, StoreError, r#trait::MessageStore};

/// In-memory message store
///
/// Records live in a `DashMap`; create-if-absent goes through the map's
/// entry API, which holds the shard lock across the check and the insert.
///
/// # Capacity Management
/// The store can be configured with a maximum number of records. When it is
/// reached, inserts fail with [`StoreError::Unavailable`], the same error a
/// database backend would report when it refuses writes.
///
/// # Durability
/// None. Intended for tests and single-process deployments where losing
/// idempotency history on restart is acceptable.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    pub(crate) records: Arc<DashMap<String, MessageRecord>>,
    capacity: Option<usize>,
}

impl MemoryMessageStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(DashMap::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn check_capacity(&self) -> crate::Result<()> {
        match self.capacity {
            Some(cap) if self.records.len() >= cap => Err(StoreError::Unavailable(format!(
                "Memory store capacity exceeded: {}/{cap} records",
                self.records.len()
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_by_id(&self, id: &str) -> crate::Result<Option<MessageRecord>> {
        Ok(self.records.get(id).map(|record| record.value().clone()))
    }

    async fn create_if_absent(&self, record: &MessageRecord) -> crate::Result<CreateOutcome> {
        // Checked outside the entry: `len` takes every shard lock
        self.check_capacity()?;

        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn update_partial(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> crate::Result<MessageRecord> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        update.apply(record.value_mut())?;

        Ok(record.value().clone())
    }

    async fn upsert_on_failure(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> crate::Result<MessageRecord> {
        if !self.records.contains_key(id) {
            self.check_capacity()?;
        }

        let mut record = self.records.entry(id.to_string()).or_insert_with(|| {
            let reason = update.error_message.clone().flatten().unwrap_or_default();
            MessageRecord::failed(id, reason)
        });

        update.apply(record.value_mut())?;

        Ok(record.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use courier_common::{DispatchRequest, MessageStatus};
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(id: &str) -> MessageRecord {
        MessageRecord::pending(&DispatchRequest::new(
            id,
            "to@example.com",
            "Subject",
            "Body",
        ))
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryMessageStore::new();
        let rec = record("msg-1");

        assert_eq!(store.find_by_id("msg-1").await.unwrap(), None);
        assert_eq!(
            store.create_if_absent(&rec).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(store.find_by_id("msg-1").await.unwrap(), Some(rec.clone()));

        let updated = store
            .update_partial(
                "msg-1",
                &RecordUpdate::new()
                    .status(MessageStatus::Sent)
                    .provider_used("ProviderA".into()),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, MessageStatus::Sent);
        assert_eq!(
            store.find_by_id("msg-1").await.unwrap().unwrap().provider_used,
            Some("ProviderA".into())
        );
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_first_record() {
        let store = MemoryMessageStore::new();
        let first = record("msg-1");
        let mut second = record("msg-1");
        second.subject = "Other".to_string();

        store.create_if_absent(&first).await.unwrap();
        assert_eq!(
            store.create_if_absent(&second).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(
            store.find_by_id("msg-1").await.unwrap().unwrap().subject,
            "Subject"
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_has_one_winner() {
        let store = MemoryMessageStore::new();

        let mut handles = vec![];
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_if_absent(&record("contended")).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.expect("Task panicked").expect("Create failed")
                == CreateOutcome::Created
            {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryMessageStore::new();
        let err = store
            .update_partial("missing", &RecordUpdate::new().increment_retry_count(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_upsert_on_failure_creates_minimal_record() {
        let store = MemoryMessageStore::new();
        let update = RecordUpdate::new()
            .status(MessageStatus::Failed)
            .error("Database error creating log");

        let rec = store.upsert_on_failure("never-created", &update).await.unwrap();
        assert_eq!(rec.status, MessageStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("Database error creating log"));

        // Existing records are updated in place
        store.create_if_absent(&record("pending")).await.unwrap();
        let rec = store.upsert_on_failure("pending", &update).await.unwrap();
        assert_eq!(rec.status, MessageStatus::Failed);
        assert_eq!(rec.recipient, "to@example.com");
    }

    #[tokio::test]
    async fn test_upsert_on_failure_never_regresses_delivery() {
        let store = MemoryMessageStore::new();
        let mut rec = record("sent");
        rec.status = MessageStatus::Sent;
        store.create_if_absent(&rec).await.unwrap();

        let err = store
            .upsert_on_failure(
                "sent",
                &RecordUpdate::new().status(MessageStatus::Failed).error("late"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(
            store.find_by_id("sent").await.unwrap().unwrap().status,
            MessageStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryMessageStore::with_capacity(2);
        assert_eq!(store.capacity(), Some(2));

        store.create_if_absent(&record("a")).await.unwrap();
        store.create_if_absent(&record("b")).await.unwrap();

        let err = store.create_if_absent(&record("c")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("capacity exceeded"));

        let ids: HashSet<_> = store.records.iter().map(|r| r.key().clone()).collect();
        assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string()]));
    }
}
