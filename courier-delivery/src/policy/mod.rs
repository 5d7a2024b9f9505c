//! Policy abstractions for dispatch operations.
//!
//! - [`RetryPolicy`]: bounded, timed attempts against a single provider

pub mod retry;

pub use retry::{RetryError, RetryPolicy};
