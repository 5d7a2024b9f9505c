pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;
pub mod types;

pub use backends::{FileMessageStore, MemoryMessageStore, StoreOperation, TestMessageStore};
pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use r#trait::MessageStore;
pub use types::{CreateOutcome, RecordUpdate};
