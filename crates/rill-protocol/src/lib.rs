//! Message types for the Rill subscription RPC surface.
//!
//! Wire encoding is out of scope here; these are the logical shapes
//! exchanged over a bidirectional streaming-fetch session plus the status
//! codes reported when a session or single call fails.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rill_common::RecordId;

/// One inbound message on a streaming-fetch session.
///
/// The first request of a session names the subscription and the consumer
/// and implicitly registers the consumer; every request (including the
/// first) may carry acknowledgments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub subscription_id: String,
    pub consumer_name: String,
    pub ack_ids: Vec<RecordId>,
}

/// A record delivered to a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedRecord {
    pub record_id: RecordId,
    pub payload: Bytes,
}

/// One outbound message on a streaming-fetch session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub records: Vec<ReceivedRecord>,
}

/// Status codes surfaced at the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Internal,
}

/// Terminal status of a session or single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: ErrorCode,
    pub message: String,
}

impl Status {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { code: ErrorCode::NotFound, message: message.into() }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self { code: ErrorCode::AlreadyExists, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { code: ErrorCode::Internal, message: message.into() }
    }
}
