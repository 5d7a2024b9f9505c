//! Store configuration
//!
//! ```text
//! store: File(path: "/var/lib/courier/records"),
//! ```
//!
//! or, for a volatile store:
//!
//! ```text
//! store: Memory(capacity: Some(100000)),
//! ```

use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileMessageStore, MemoryMessageStore, MessageStore};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub enum StoreConfig {
    Memory {
        #[serde(default)]
        capacity: Option<usize>,
    },
    File {
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory { capacity: None }
    }
}

impl StoreConfig {
    /// Open the configured backend.
    ///
    /// # Errors
    /// If a file store directory cannot be created or validated
    pub async fn open(&self) -> crate::Result<Arc<dyn MessageStore>> {
        match self {
            Self::Memory { capacity } => Ok(Arc::new(
                capacity.map_or_else(MemoryMessageStore::new, MemoryMessageStore::with_capacity),
            )),
            Self::File { path } => {
                let store = FileMessageStore::new(path.clone());
                store.init().await?;
                Ok(Arc::new(store))
            }
        }
    }
}
