//! Re-delivery of records left unacked past the ack timeout.
//!
//! Each dispatched batch schedules one resend task carrying only the
//! subscription id and the dispatched ids; the runtime is re-resolved
//! through the registry on every fire so the task survives subscription
//! deletion races by simply finding nothing.

use std::sync::Weak;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use rill_common::RecordId;

use super::runtime::ResendTick;
use crate::registry::SubscriptionRegistry;

/// Schedule re-delivery checks for `ids`, first firing one ack timeout
/// from now and then once per timeout until every id is acked or the
/// subscription disappears.
pub(crate) fn schedule(
    registry: Weak<SubscriptionRegistry>,
    subscription_id: String,
    ids: Vec<RecordId>,
    ack_timeout: Duration,
) {
    if ids.is_empty() {
        return;
    }
    tokio::spawn(async move {
        loop {
            sleep(ack_timeout).await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let Some(runtime) = registry.runtime(&subscription_id).await else {
                debug!(subscription = %subscription_id, "runtime gone, resend abandoned");
                return;
            };
            match runtime.resend_once(&ids).await {
                Ok(ResendTick::Drained) => {
                    debug!(subscription = %subscription_id, ids = ids.len(), "resend drained");
                    return;
                }
                Ok(ResendTick::Retry) => {}
                Err(e) => {
                    warn!(
                        subscription = %subscription_id,
                        error = %e,
                        "resend pass failed, abandoning"
                    );
                    return;
                }
            }
        }
    });
}
