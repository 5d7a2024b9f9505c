//! File-backed message store
//!
//! Each record is a bincode file in the store directory, named after the
//! SHA-256 digest of the message id. Caller ids of any length or content map
//! to a fixed-length file name; the full id is kept inside the record and
//! checked on read.
//!
//! # Uniqueness
//!
//! New records are written to a uniquely named temporary file and then
//! hard-linked to their final name. `link(2)` fails with `EEXIST` if the
//! target already exists, so the filesystem itself picks exactly one winner
//! among concurrent creators, and readers never observe a partially written
//! record.
//!
//! # Updates
//!
//! Partial updates are read-modify-write under a per-id async lock, written
//! to a temporary file and renamed over the existing record. A lock's entry
//! is removed once no task holds or waits on it.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use courier_common::{MessageRecord, tracing};
use dashmap::DashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::{
    CreateOutcome, RecordUpdate, SerializationError, StoreError, ValidationError,
    r#trait::MessageStore,
};

const RECORD_EXTENSION: &str = "rec";

#[derive(Debug, Clone, Deserialize)]
pub struct FileMessageStore {
    path: PathBuf,
    #[serde(skip)]
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileMessageStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            locks: Arc::default(),
        }
    }

    /// Create the store directory if needed and check that it is usable.
    ///
    /// # Errors
    /// If the directory cannot be created, is not a directory, or is read-only
    pub async fn init(&self) -> crate::Result<()> {
        tokio::fs::create_dir_all(&self.path).await?;

        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }
        if metadata.permissions().readonly() {
            return Err(ValidationError::NotWritable(self.path.display().to_string()).into());
        }

        tracing::info!(path = %self.path.display(), "File message store ready");
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, id: &str) -> PathBuf {
        let digest = Sha256::digest(id.as_bytes());
        self.path
            .join(format!("{}.{RECORD_EXTENSION}", hex::encode(digest)))
    }

    fn temp_path(&self) -> PathBuf {
        self.path.join(format!(".{}.tmp", Ulid::new()))
    }

    async fn lock<'a>(&'a self, id: &'a str) -> IdLock<'a> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        IdLock {
            locks: &self.locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    fn encode(record: &MessageRecord) -> crate::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| SerializationError::Encode(e).into())
    }

    fn decode(id: &str, bytes: &[u8]) -> crate::Result<MessageRecord> {
        let (record, _): (MessageRecord, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(SerializationError::Decode)?;

        if record.id != id {
            return Err(SerializationError::Corrupted(format!(
                "record file for {id} contains {}",
                record.id
            ))
            .into());
        }

        Ok(record)
    }

    async fn read(&self, id: &str) -> crate::Result<Option<MessageRecord>> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => Self::decode(id, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_temp(&self, record: &MessageRecord) -> crate::Result<PathBuf> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, Self::encode(record)?).await?;
        Ok(temp)
    }

    async fn discard_temp(temp: &Path) {
        if let Err(e) = tokio::fs::remove_file(temp).await {
            tracing::warn!(path = %temp.display(), error = %e, "Failed to remove temporary record file");
        }
    }

    /// Publish a new record unless one already exists
    async fn link_new(&self, record: &MessageRecord) -> crate::Result<CreateOutcome> {
        let temp = self.write_temp(record).await?;
        let result = tokio::fs::hard_link(&temp, self.record_path(&record.id)).await;
        Self::discard_temp(&temp).await;

        match result {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace an existing record
    async fn replace(&self, record: &MessageRecord) -> crate::Result<()> {
        let temp = self.write_temp(record).await?;
        if let Err(e) = tokio::fs::rename(&temp, self.record_path(&record.id)).await {
            Self::discard_temp(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn update_existing(
        &self,
        mut record: MessageRecord,
        update: &RecordUpdate,
    ) -> crate::Result<MessageRecord> {
        update.apply(&mut record)?;
        self.replace(&record).await?;
        Ok(record)
    }
}

/// Exclusive hold on one id's lock
struct IdLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits on it
        self.locks
            .remove_if(self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn find_by_id(&self, id: &str) -> crate::Result<Option<MessageRecord>> {
        self.read(id).await
    }

    async fn create_if_absent(&self, record: &MessageRecord) -> crate::Result<CreateOutcome> {
        self.link_new(record).await
    }

    async fn update_partial(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> crate::Result<MessageRecord> {
        let _lock = self.lock(id).await;

        let record = self
            .read(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        self.update_existing(record, update).await
    }

    async fn upsert_on_failure(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> crate::Result<MessageRecord> {
        let _lock = self.lock(id).await;

        if let Some(record) = self.read(id).await? {
            return self.update_existing(record, update).await;
        }

        let reason = update.error_message.clone().flatten().unwrap_or_default();
        let mut record = MessageRecord::failed(id, reason);
        update.apply(&mut record)?;

        match self.link_new(&record).await? {
            CreateOutcome::Created => Ok(record),
            // A creator raced us between the read and the link
            CreateOutcome::AlreadyExists => {
                let existing = self
                    .read(id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                self.update_existing(existing, update).await
            }
        }
    }
}
