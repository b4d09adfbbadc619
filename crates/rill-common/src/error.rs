//! Error types for Rill.

use thiserror::Error;

use crate::metadata::MetadataError;

/// Result type alias for Rill operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Rill broker.
#[derive(Error, Debug)]
pub enum Error {
    /// Lookup of a deleted or never-created subscription.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Mid-session observation that the subscription was deleted.
    #[error("Subscription has been removed")]
    SubscriptionRemoved,

    /// Subscription created against a stream that does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Transport error sending to one consumer.
    #[error("failed to send to consumer {0}")]
    ConsumerSendFailed(String),

    /// Non-recoverable reader error; terminates the subscription runtime.
    #[error("log reader failed: {0}")]
    ReaderFatal(String),

    /// Metadata store errors
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
