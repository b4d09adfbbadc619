//! Bidirectional streaming-fetch sessions.
//!
//! One session per consumer connection. The first request names the
//! subscription and the consumer and registers the session's sender with
//! the runtime; every request after that only carries acks. Closing the
//! session detaches the consumer but never deletes the runtime, so the
//! acked window survives reconnects.
//!
//! The session holds no reference to the runtime itself: every mutation
//! re-resolves it by id through the registry, which is what makes
//! concurrent subscription deletion observable as a clean
//! "Subscription has been removed" instead of a race.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rill_common::{Error, RecordId};
use rill_protocol::{FetchRequest, FetchResponse, Status};

use crate::registry::SubscriptionRegistry;
use crate::subscription::ConsumerSender;

/// Drive one streaming-fetch session until the client closes it, an error
/// terminates it, or the subscription disappears.
pub async fn run_session(
    registry: &Arc<SubscriptionRegistry>,
    mut requests: mpsc::Receiver<FetchRequest>,
    responses: mpsc::Sender<FetchResponse>,
) -> Result<(), Status> {
    // FirstRequest: resolve or create the runtime, then register.
    let Some(first) = requests.recv().await else {
        return Ok(());
    };
    let subscription_id = first.subscription_id.clone();
    let consumer_name = first.consumer_name.clone();

    let runtime = registry
        .get_or_create_runtime(&subscription_id)
        .await
        .map_err(session_status)?;
    runtime
        .attach_consumer(ConsumerSender::new(consumer_name.clone(), responses))
        .await
        .map_err(session_status)?;
    info!(subscription = %subscription_id, consumer = %consumer_name, "session attached");

    // Attached: fold acks until the client goes away.
    let result = drive_acks(registry, &subscription_id, &consumer_name, first.ack_ids, &mut requests)
        .await;

    // Closed: detach, never delete.
    registry.detach_consumer(&subscription_id, &consumer_name).await;
    debug!(subscription = %subscription_id, consumer = %consumer_name, "session closed");
    result
}

async fn drive_acks(
    registry: &Arc<SubscriptionRegistry>,
    subscription_id: &str,
    consumer_name: &str,
    mut ack_ids: Vec<RecordId>,
    requests: &mut mpsc::Receiver<FetchRequest>,
) -> Result<(), Status> {
    loop {
        if !ack_ids.is_empty() {
            let runtime = registry
                .runtime(subscription_id)
                .await
                .ok_or_else(|| session_status(Error::SubscriptionRemoved))?;
            runtime.ack_batch(&ack_ids).await.map_err(session_status)?;
        }
        match requests.recv().await {
            Some(request) => {
                if request.subscription_id != subscription_id {
                    warn!(
                        expected = %subscription_id,
                        got = %request.subscription_id,
                        consumer = %consumer_name,
                        "request names a different subscription, ignoring the name"
                    );
                }
                ack_ids = request.ack_ids;
            }
            None => return Ok(()),
        }
    }
}

/// Session-terminating status for an engine error. A missing or deleted
/// subscription reads the same from the client's side; a missing
/// underlying stream is a not-found at create time.
fn session_status(error: Error) -> Status {
    match error {
        Error::SubscriptionNotFound(_) | Error::SubscriptionRemoved => {
            Status::internal("Subscription has been removed")
        }
        Error::StreamNotFound(name) => Status::not_found(format!("stream {name}")),
        other => Status::internal(other.to_string()),
    }
}
