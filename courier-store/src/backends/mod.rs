//! Backend implementations of [`MessageStore`](crate::MessageStore):
//! - `memory`: concurrent in-process map
//! - `file`: one record file per message, durable across restarts
//! - `test`: memory store with fault injection and call counting

pub mod file;
pub mod memory;

pub use file::FileMessageStore;
pub use memory::MemoryMessageStore;
pub use test::{StoreOperation, TestMessageStore};
