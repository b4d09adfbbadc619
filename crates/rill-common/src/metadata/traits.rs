//! Metadata store abstraction.
//!
//! The broker treats persistence as an external KV of JSON-encoded
//! objects keyed by `subscriptions/<id>`, with list/get/put/delete and a
//! per-key existence check.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Subscription;

/// Metadata store errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("item already exists: {0}")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Persistent store of subscription definitions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persist a new subscription. Fails with `AlreadyExists` when the id
    /// is already taken.
    async fn create(&self, subscription: &Subscription) -> Result<()>;

    /// Fetch one subscription by id.
    async fn get(&self, id: &str) -> Result<Option<Subscription>>;

    /// Per-key existence check.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Enumerate all persisted subscriptions.
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Remove a subscription. Fails with `NotFound` when absent.
    async fn delete(&self, id: &str) -> Result<()>;
}
