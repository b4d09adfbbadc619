//! Common types for Rill.
//!
//! Shared identifier types, the workspace-wide error type and the
//! subscription metadata store abstraction used by the broker.

pub mod error;
pub mod metadata;
pub mod types;

pub use error::{Error, Result};
pub use types::{LogId, Lsn, RecordId, Subscription, SubscriptionOffset, LSN_MAX, LSN_MIN};
