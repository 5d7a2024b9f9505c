//! Error types for the courier-store crate.
//!
//! "Not found" is never an error for lookups (they return `Option`); the
//! variants here are infrastructure failures and rejected writes.

use std::io;

use courier_common::MessageStatus;
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// I/O operation failed (file read/write/link/rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Store directory validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A partial update targeted an id with no record.
    #[error("Message not found: {0}")]
    NotFound(String),

    /// The update would move a record backwards through its lifecycle.
    #[error("Message {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: MessageStatus,
        to: MessageStatus,
    },

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns `true` for infrastructure failures, as opposed to rejected writes.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Io(_)
                | Self::Serialization(_)
                | Self::Validation(_)
                | Self::Internal(_)
        )
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Record data is corrupted or incomplete.
    #[error("Corrupted record data: {0}")]
    Corrupted(String),
}

/// Store directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Store path is not a directory.
    #[error("Store path is not a directory: {0}")]
    NotDirectory(String),

    /// Store path is not writable.
    #[error("Store path is not writable: {0}")]
    NotWritable(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
