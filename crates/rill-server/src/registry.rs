//! Process-wide registry of subscription runtimes.
//!
//! The registry owns every live `SubscriptionRuntime`; sessions and resend
//! timers hold only the subscription id and re-resolve through here, so a
//! deleted subscription is observed as "gone" rather than raced.
//!
//! The map lock is held only for lookups, inserts and removals — never
//! across metadata or storage I/O and never across a call into a runtime,
//! so one subscription's slow instantiation or deletion cannot stall every
//! other subscription's resolution. Creation runs its slow path (metadata
//! fetch, reader open) unlocked and re-checks the map before inserting;
//! a delete racing that window is closed by re-reading persistence after
//! the insert.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info};

use rill_common::{Error, RecordId, Result, Subscription, SubscriptionOffset, LSN_MAX, LSN_MIN};
use rill_common::metadata::SubscriptionStore;
use rill_storage::LogClient;

use crate::config::EngineConfig;
use crate::subscription::SubscriptionRuntime;

pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
    logs: Arc<dyn LogClient>,
    config: EngineConfig,
    runtimes: Mutex<HashMap<String, Arc<SubscriptionRuntime>>>,
    /// Handed to runtimes so resend timers can re-resolve through the
    /// registry without keeping it alive.
    self_ref: Weak<SubscriptionRegistry>,
}

impl SubscriptionRegistry {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        logs: Arc<dyn LogClient>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            logs,
            config,
            runtimes: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Persist a new subscription. The underlying stream must exist; no
    /// runtime is materialized until the first consumer session.
    pub async fn create(&self, subscription: Subscription) -> Result<Subscription> {
        self.logs.stream_log_id(&subscription.stream_name).await?;
        self.store.create(&subscription).await?;
        info!(
            subscription = %subscription.id,
            stream = %subscription.stream_name,
            "subscription created"
        );
        Ok(subscription)
    }

    /// Delete a subscription. Persistence goes first so future lookups
    /// fail; the runtime, if any, is then marked deleted so every
    /// in-flight dispatch, resend and session short-circuits. It is reaped
    /// now when no consumer is attached, otherwise by the last detach.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        let runtime = self.runtimes.lock().await.get(id).cloned();
        if let Some(runtime) = runtime {
            let had_consumers = runtime.mark_deleted().await;
            if !had_consumers {
                self.remove_if_same(id, &runtime).await;
            }
        }
        info!(subscription = %id, "subscription deleted");
        Ok(())
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.store.exists(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Subscription>> {
        Ok(self.store.list().await?)
    }

    /// Current runtime for a subscription, if one is materialized.
    pub async fn runtime(&self, id: &str) -> Option<Arc<SubscriptionRuntime>> {
        self.runtimes.lock().await.get(id).cloned()
    }

    /// Resolve the runtime for a session, instantiating it from persisted
    /// metadata on first use. The new runtime's reader starts from its
    /// durable checkpoint when one exists, else from the subscription's
    /// start offset, and the background dispatch loop is spawned.
    pub async fn get_or_create_runtime(&self, id: &str) -> Result<Arc<SubscriptionRuntime>> {
        if let Some(runtime) = self.runtime(id).await {
            return Ok(runtime);
        }

        // Slow path, no lock held: load metadata and open the readers.
        let subscription = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::SubscriptionNotFound(id.to_string()))?;

        let log_id = self.logs.stream_log_id(&subscription.stream_name).await?;
        let start = match subscription.offset {
            SubscriptionOffset::Earliest => RecordId::new(LSN_MIN, 0),
            SubscriptionOffset::Latest => {
                RecordId::new(self.logs.tail_lsn(log_id).await? + 1, 0)
            }
            SubscriptionOffset::RecordId(record_id) => record_id,
        };

        let mut reader = self
            .logs
            .open_checkpointed_reader(log_id, &subscription.id)
            .await?;
        let begin = reader.start(start.batch_id, LSN_MAX).await?;
        // When the reader resumed from a checkpoint the window begins
        // there, not at the configured start offset.
        let lower_bound = if begin == start.batch_id {
            start
        } else {
            RecordId::new(begin, 0)
        };
        let rereader = self.logs.open_reader(log_id).await?;

        let runtime = Arc::new(SubscriptionRuntime::new(
            &subscription,
            log_id,
            lower_bound,
            reader,
            rereader,
            self.self_ref.clone(),
            self.config.clone(),
        ));

        {
            let mut runtimes = self.runtimes.lock().await;
            if let Some(existing) = runtimes.get(id) {
                // Another session materialized the runtime first; ours is
                // discarded before its dispatch loop ever starts.
                return Ok(existing.clone());
            }
            runtimes.insert(id.to_string(), runtime.clone());
        }
        runtime.clone().spawn_dispatch_loop();

        // A delete may have run while the runtime was being built and
        // found nothing in the map to mark; re-reading persistence after
        // the insert closes that window.
        if !self.store.exists(id).await? {
            runtime.mark_deleted().await;
            self.remove_if_same(id, &runtime).await;
            return Err(Error::SubscriptionNotFound(id.to_string()));
        }

        info!(
            subscription = %id,
            stream = %subscription.stream_name,
            log = log_id,
            start = %lower_bound,
            "subscription runtime created"
        );
        Ok(runtime)
    }

    /// Detach one consumer, reaping the runtime when it was the last
    /// consumer of a deleted subscription.
    pub async fn detach_consumer(&self, id: &str, consumer_name: &str) {
        let Some(runtime) = self.runtime(id).await else {
            return;
        };
        if runtime.detach_consumer(consumer_name).await
            && self.remove_if_same(id, &runtime).await
        {
            debug!(subscription = %id, "deleted runtime reaped on last detach");
        }
    }

    /// Remove `runtime` from the map unless the id has since been taken
    /// over by a different runtime instance.
    async fn remove_if_same(&self, id: &str, runtime: &Arc<SubscriptionRuntime>) -> bool {
        let mut runtimes = self.runtimes.lock().await;
        match runtimes.get(id) {
            Some(current) if Arc::ptr_eq(current, runtime) => {
                runtimes.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
