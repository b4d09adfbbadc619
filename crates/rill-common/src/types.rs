//! Core identifier types shared across the broker.

use serde::{Deserialize, Serialize};

/// Log sequence number assigned by the storage layer. Monotonically
/// increasing per log; one LSN covers one appended batch.
pub type Lsn = u64;

/// Identifier of a log inside the storage layer.
pub type LogId = u64;

/// Oldest LSN the storage layer can assign.
pub const LSN_MIN: Lsn = 1;

/// Upper bound used when a reader should never stop on its own.
pub const LSN_MAX: Lsn = u64::MAX;

/// Identifier of a single record: the LSN of the batch it was appended in
/// plus its index within that batch.
///
/// The derived `Ord` is lexicographic over `(batch_id, batch_index)`, which
/// is the total delivery order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RecordId {
    pub batch_id: Lsn,
    pub batch_index: u32,
}

impl RecordId {
    pub const fn new(batch_id: Lsn, batch_index: u32) -> Self {
        Self { batch_id, batch_index }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.batch_id, self.batch_index)
    }
}

/// Where a subscription starts consuming its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionOffset {
    /// The oldest record still present in the log.
    Earliest,
    /// Records appended after the subscription runtime is created.
    Latest,
    /// An explicit position.
    RecordId(RecordId),
}

/// Immutable subscription configuration. Persisted in the metadata store
/// under `subscriptions/<id>`; deletion is final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub stream_name: String,
    pub ack_timeout_seconds: u32,
    pub offset: SubscriptionOffset,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        stream_name: impl Into<String>,
        ack_timeout_seconds: u32,
        offset: SubscriptionOffset,
    ) -> Self {
        Self {
            id: id.into(),
            stream_name: stream_name.into(),
            ack_timeout_seconds,
            offset,
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_order_is_lexicographic() {
        assert!(RecordId::new(1, 5) < RecordId::new(2, 0));
        assert!(RecordId::new(2, 0) < RecordId::new(2, 1));
        assert!(RecordId::new(3, u32::MAX) < RecordId::new(4, 0));
        assert_eq!(RecordId::new(7, 3), RecordId::new(7, 3));
    }

    #[test]
    fn subscription_round_trips_through_json() {
        let sub = Subscription::new(
            "sub-1",
            "orders",
            60,
            SubscriptionOffset::RecordId(RecordId::new(42, 7)),
        );
        let encoded = serde_json::to_string(&sub).unwrap();
        let decoded: Subscription = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, "sub-1");
        assert_eq!(decoded.stream_name, "orders");
        assert_eq!(decoded.ack_timeout_seconds, 60);
        assert_eq!(
            decoded.offset,
            SubscriptionOffset::RecordId(RecordId::new(42, 7))
        );
    }
}
