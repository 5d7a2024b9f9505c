//! Shared types for the courier dispatcher
//!
//! - [`MessageRecord`] and [`DispatchRequest`]: the persisted message model
//! - [`MessageStatus`] and its forward-only transition rules
//! - [`ProviderId`]: stable identity for delivery providers
//! - [`logging`]: subscriber setup and logging macros

pub mod logging;
pub mod message;
pub mod provider;
pub mod status;

pub use message::{DispatchRequest, MessageRecord};
pub use provider::ProviderId;
pub use status::{MessageStatus, ParseStatusError, StatusLookup};
pub use tracing;
