//! Storage error types.

use thiserror::Error;

use rill_common::LogId;

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("log not found: {0}")]
    LogNotFound(LogId),

    #[error("invalid read range: [{start}, {until}]")]
    InvalidRange { start: u64, until: u64 },

    #[error("storage error: {0}")]
    Internal(String),
}

impl From<LogError> for rill_common::Error {
    fn from(e: LogError) -> Self {
        match e {
            LogError::StreamNotFound(name) => rill_common::Error::StreamNotFound(name),
            other => rill_common::Error::Storage(other.to_string()),
        }
    }
}
