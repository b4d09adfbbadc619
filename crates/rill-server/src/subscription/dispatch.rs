//! Round-robin distribution of a batch of records across the consumers
//! attached to one subscription.

use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rill_common::{Error, RecordId, Result};
use rill_protocol::{FetchResponse, ReceivedRecord};

/// Capability to push one response to a named consumer.
///
/// Backed by an `mpsc` sender, so writes to the underlying session are
/// single-writer by construction: concurrent dispatch and resend paths
/// enqueue whole responses and can never interleave two of them. Sending
/// fails with `ConsumerSendFailed` when the consumer's session is gone.
#[derive(Clone)]
pub struct ConsumerSender {
    name: String,
    tx: mpsc::Sender<FetchResponse>,
}

impl ConsumerSender {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<FetchResponse>) -> Self {
        Self { name: name.into(), tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, response: FetchResponse) -> Result<()> {
        self.tx
            .send(response)
            .await
            .map_err(|_| Error::ConsumerSendFailed(self.name.clone()))
    }

    /// Whether two senders push into the same session.
    pub fn same_channel(&self, other: &ConsumerSender) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Result of one distribution call.
#[derive(Debug, Default)]
pub struct DistributeOutcome {
    /// Consumers whose send failed; the caller removes them.
    pub failed: Vec<String>,
}

/// Distribute `records` across `senders` by stable round robin.
///
/// Records are pre-partitioned by `index % M` over the canonically ordered
/// (by name) senders, then each consumer receives one response carrying
/// its partition. A failed sender is reported and gets nothing further
/// within this call; its records are recovered by the resend path. No
/// retries here.
///
/// Must be called without the runtime state lock held.
pub async fn distribute(
    records: Vec<(RecordId, Bytes)>,
    senders: &BTreeMap<String, ConsumerSender>,
) -> DistributeOutcome {
    let mut outcome = DistributeOutcome::default();
    if records.is_empty() || senders.is_empty() {
        return outcome;
    }

    let m = senders.len();
    let mut partitions: Vec<Vec<ReceivedRecord>> = vec![Vec::new(); m];
    for (index, (record_id, payload)) in records.into_iter().enumerate() {
        partitions[index % m].push(ReceivedRecord { record_id, payload });
    }

    for ((name, sender), partition) in senders.iter().zip(partitions) {
        if partition.is_empty() {
            continue;
        }
        let count = partition.len();
        match sender.send(FetchResponse { records: partition }).await {
            Ok(()) => debug!(consumer = %name, records = count, "dispatched"),
            Err(e) => {
                warn!(records = count, error = %e, "dropping consumer");
                outcome.failed.push(name.clone());
            }
        }
    }
    outcome
}
