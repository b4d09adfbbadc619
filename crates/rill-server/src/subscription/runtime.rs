//! Per-subscription runtime state and the dispatch path.
//!
//! One `SubscriptionRuntime` exists per active subscription. All state
//! mutations serialize on the runtime's state lock; storage reads,
//! checkpoint writes and consumer sends happen outside it. The reader and
//! rereader sit behind their own locks so a slow consumer can never block
//! ack handling.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use rill_common::{Error, LogId, RecordId, Result, Subscription};
use rill_protocol::{FetchResponse, ReceivedRecord};
use rill_storage::{CheckpointedReader, LogReader, ReadItem};

use super::acked_ranges::{AckInsert, AckedRanges, BatchNumMap};
use super::dispatch::{distribute, ConsumerSender};
use super::resend;
use crate::config::EngineConfig;
use crate::registry::SubscriptionRegistry;

struct RuntimeState {
    /// False once deletion begins; every operation short-circuits on it.
    valid: bool,
    /// Next id expected; everything strictly below is checkpointed.
    window_lower_bound: RecordId,
    /// Highest id ever dispatched. Diagnostics only; never consulted for
    /// window advancement.
    window_upper_bound: RecordId,
    acked_ranges: AckedRanges,
    batch_counts: BatchNumMap,
    /// Consumer name -> sender, in canonical (name) order.
    stream_sends: BTreeMap<String, ConsumerSender>,
    /// One-shot waiters parked on "a consumer exists again".
    signals: Vec<oneshot::Sender<()>>,
}

/// Point-in-time view of a runtime, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub valid: bool,
    pub window_lower_bound: RecordId,
    pub window_upper_bound: RecordId,
    pub acked_range_count: usize,
    pub consumer_count: usize,
}

/// Outcome of one resend pass over a dispatched id set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResendTick {
    /// Every id is acked (or the runtime is gone); stop rescheduling.
    Drained,
    /// Some ids are still unacked; run again after the ack timeout.
    Retry,
}

pub struct SubscriptionRuntime {
    subscription_id: String,
    stream_name: String,
    log_id: LogId,
    ack_timeout: Duration,
    config: EngineConfig,
    registry: Weak<SubscriptionRegistry>,
    state: Mutex<RuntimeState>,
    reader: Mutex<Box<dyn CheckpointedReader>>,
    rereader: Mutex<Box<dyn LogReader>>,
}

impl SubscriptionRuntime {
    pub(crate) fn new(
        subscription: &Subscription,
        log_id: LogId,
        start: RecordId,
        reader: Box<dyn CheckpointedReader>,
        rereader: Box<dyn LogReader>,
        registry: Weak<SubscriptionRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            subscription_id: subscription.id.clone(),
            stream_name: subscription.stream_name.clone(),
            log_id,
            ack_timeout: Duration::from_secs(u64::from(subscription.ack_timeout_seconds)),
            config,
            registry,
            state: Mutex::new(RuntimeState {
                valid: true,
                window_lower_bound: start,
                window_upper_bound: start,
                acked_ranges: AckedRanges::new(),
                batch_counts: BatchNumMap::new(),
                stream_sends: BTreeMap::new(),
                signals: Vec::new(),
            }),
            reader: Mutex::new(reader),
            rereader: Mutex::new(rereader),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let state = self.state.lock().await;
        RuntimeSnapshot {
            valid: state.valid,
            window_lower_bound: state.window_lower_bound,
            window_upper_bound: state.window_upper_bound,
            acked_range_count: state.acked_ranges.len(),
            consumer_count: state.stream_sends.len(),
        }
    }

    /// Register a consumer sender and wake everything parked on
    /// "no consumer".
    pub async fn attach_consumer(&self, sender: ConsumerSender) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.valid {
            return Err(Error::SubscriptionRemoved);
        }
        let name = sender.name().to_string();
        if state.stream_sends.insert(name.clone(), sender).is_some() {
            warn!(
                subscription = %self.subscription_id,
                consumer = %name,
                "consumer name reused, replacing previous sender"
            );
        }
        info!(subscription = %self.subscription_id, consumer = %name, "consumer attached");
        for waiter in state.signals.drain(..) {
            let _ = waiter.send(());
        }
        Ok(())
    }

    /// Remove a consumer sender if present. Idempotent; the runtime itself
    /// is retained so the acked window survives reconnects. Returns true
    /// when the runtime is deleted and now has no consumers, i.e. the
    /// caller should reap it.
    pub async fn detach_consumer(&self, name: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.stream_sends.remove(name).is_some() {
            info!(subscription = %self.subscription_id, consumer = %name, "consumer detached");
        }
        !state.valid && state.stream_sends.is_empty()
    }

    /// Fold a batch of acks, advance the window as far as it goes, then
    /// write one checkpoint per advancement.
    pub async fn ack_batch(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let checkpoints = {
            let mut state = self.state.lock().await;
            if !state.valid {
                return Err(Error::SubscriptionRemoved);
            }
            debug!(
                subscription = %self.subscription_id,
                acks = ids.len(),
                lower_bound = %state.window_lower_bound,
                "handling acks"
            );
            let state = &mut *state;
            for &id in ids {
                match state.acked_ranges.insert_ack(id, state.window_lower_bound, &state.batch_counts) {
                    AckInsert::Inserted => {}
                    AckInsert::Duplicate => {
                        debug!(subscription = %self.subscription_id, %id, "duplicate ack ignored")
                    }
                    AckInsert::BelowWindow => {
                        debug!(subscription = %self.subscription_id, %id, "ack below window ignored")
                    }
                }
            }
            let mut checkpoints = Vec::new();
            while let Some(commit) = state
                .acked_ranges
                .advance_window(&mut state.window_lower_bound, &state.batch_counts)
            {
                checkpoints.push(commit);
            }
            checkpoints
        };

        // Checkpoint writes go to storage without the state lock held.
        if !checkpoints.is_empty() {
            let mut reader = self.reader.lock().await;
            for commit in &checkpoints {
                reader
                    .write_checkpoint(commit.batch_id)
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?;
                debug!(
                    subscription = %self.subscription_id,
                    checkpoint = %commit,
                    "window advanced, checkpoint written"
                );
            }
        }
        Ok(())
    }

    /// Flip the runtime invalid, drop every sender and wake all waiters.
    /// Returns whether any consumer was attached at that moment (callers
    /// use this to decide between reaping now and reaping on last detach).
    pub async fn mark_deleted(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.valid {
            return !state.stream_sends.is_empty();
        }
        state.valid = false;
        let had_consumers = !state.stream_sends.is_empty();
        state.stream_sends.clear();
        for waiter in state.signals.drain(..) {
            let _ = waiter.send(());
        }
        info!(subscription = %self.subscription_id, "subscription runtime marked deleted");
        had_consumers
    }

    /// One dispatch iteration. Suspends until a consumer is attached,
    /// reads a slice of the log, fans it out round robin and schedules the
    /// resend timer for the dispatched ids. Returns false once the runtime
    /// is invalid and the dispatch loop should stop.
    pub async fn dispatch_once(&self) -> Result<bool> {
        // Wait for at least one consumer.
        loop {
            let waiter = {
                let mut state = self.state.lock().await;
                if !state.valid {
                    return Ok(false);
                }
                if state.stream_sends.is_empty() {
                    let (tx, rx) = oneshot::channel();
                    state.signals.push(tx);
                    Some(rx)
                } else {
                    None
                }
            };
            match waiter {
                Some(rx) => {
                    // Wakes on attach or deletion; both re-enter the check.
                    let _ = rx.await;
                }
                None => break,
            }
        }

        // Read outside the state lock.
        let items = {
            let mut reader = self.reader.lock().await;
            match reader.read(self.config.max_poll_records).await {
                Ok(items) => items,
                Err(e) => {
                    error!(
                        subscription = %self.subscription_id,
                        error = %e,
                        "log read failed, shutting subscription down"
                    );
                    self.mark_deleted().await;
                    return Err(Error::ReaderFatal(e.to_string()));
                }
            }
        };
        if items.is_empty() {
            return Ok(true);
        }

        // Fold the read into the window state and take a senders snapshot.
        let (records, senders) = {
            let mut state = self.state.lock().await;
            if !state.valid {
                return Ok(false);
            }
            let mut records: Vec<(RecordId, Bytes)> = Vec::new();
            for item in items {
                match item {
                    ReadItem::Gap { kind, lo, hi } => {
                        debug!(
                            subscription = %self.subscription_id,
                            ?kind,
                            lo,
                            hi,
                            "storage gap recorded as acked"
                        );
                        let RuntimeState { acked_ranges, batch_counts, .. } = &mut *state;
                        acked_ranges.insert_gap(lo, hi, batch_counts);
                    }
                    ReadItem::Batch { lsn, payloads } => {
                        if payloads.is_empty() {
                            continue;
                        }
                        state.batch_counts.insert(lsn, payloads.len() as u32);
                        for (index, payload) in payloads.into_iter().enumerate() {
                            records.push((RecordId::new(lsn, index as u32), payload));
                        }
                    }
                }
            }
            if let Some(&(last, _)) = records.last() {
                state.window_upper_bound = state.window_upper_bound.max(last);
            }
            (records, state.stream_sends.clone())
        };
        if records.is_empty() {
            return Ok(true);
        }

        let ids: Vec<RecordId> = records.iter().map(|(id, _)| *id).collect();
        debug!(
            subscription = %self.subscription_id,
            records = ids.len(),
            consumers = senders.len(),
            "dispatching"
        );

        // Sends happen with no lock held; failures reconcile afterwards.
        let outcome = distribute(records, &senders).await;
        if !outcome.failed.is_empty() {
            self.remove_failed_senders(&outcome.failed, &senders).await;
        }

        resend::schedule(
            self.registry.clone(),
            self.subscription_id.clone(),
            ids,
            self.ack_timeout,
        );
        Ok(true)
    }

    /// Spawn the background dispatch loop for this runtime. One loop per
    /// runtime; it stops once the runtime is marked deleted.
    pub fn spawn_dispatch_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.dispatch_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.dispatch_once().await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        error!(
                            subscription = %self.subscription_id,
                            error = %e,
                            "dispatch failed"
                        );
                        break;
                    }
                }
            }
            debug!(subscription = %self.subscription_id, "dispatch loop stopped");
        });
    }

    /// One resend pass over `ids`: re-deliver everything still unacked.
    pub(crate) async fn resend_once(&self, ids: &[RecordId]) -> Result<ResendTick> {
        // Figure out what is still owed, parking while no consumer exists.
        let (plan, senders) = loop {
            let waiter = {
                let mut state = self.state.lock().await;
                if !state.valid {
                    return Ok(ResendTick::Drained);
                }
                let unacked: Vec<RecordId> = ids
                    .iter()
                    .copied()
                    .filter(|&id| {
                        id >= state.window_lower_bound && !state.acked_ranges.covers(id)
                    })
                    .collect();
                if unacked.is_empty() {
                    return Ok(ResendTick::Drained);
                }
                if state.stream_sends.is_empty() {
                    let (tx, rx) = oneshot::channel();
                    state.signals.push(tx);
                    Some(rx)
                } else {
                    let plan: Vec<(RecordId, u32)> = unacked
                        .into_iter()
                        .filter_map(|id| {
                            match state.batch_counts.get(&id.batch_id) {
                                Some(&count) => Some((id, count)),
                                None => {
                                    warn!(
                                        subscription = %self.subscription_id,
                                        %id,
                                        "no batch entry for unacked id, skipping resend"
                                    );
                                    None
                                }
                            }
                        })
                        .collect();
                    break (plan, state.stream_sends.clone());
                }
            };
            if let Some(rx) = waiter {
                let _ = rx.await;
            }
        };

        // Reread and send with no state lock held. A sender that fails is
        // skipped for the rest of this pass via the alive bitmap.
        let senders: Vec<(String, ConsumerSender)> = senders.into_iter().collect();
        let mut alive = vec![true; senders.len()];
        for (turn, &(id, count)) in plan.iter().enumerate() {
            let payload = match self.reread(id, count).await? {
                Some(payload) => payload,
                None => {
                    warn!(subscription = %self.subscription_id, %id, "record vanished on reread");
                    continue;
                }
            };
            let response = FetchResponse {
                records: vec![ReceivedRecord { record_id: id, payload }],
            };
            let mut sent = false;
            for probe in 0..senders.len() {
                let slot = (turn + probe) % senders.len();
                if !alive[slot] {
                    continue;
                }
                let (name, sender) = &senders[slot];
                match sender.send(response.clone()).await {
                    Ok(()) => {
                        debug!(subscription = %self.subscription_id, consumer = %name, %id, "resent");
                        sent = true;
                        break;
                    }
                    Err(e) => {
                        warn!(subscription = %self.subscription_id, error = %e, "resend send failed");
                        alive[slot] = false;
                    }
                }
            }
            if !sent {
                // Every sender died mid-pass; the rest stays unacked for
                // the next tick.
                break;
            }
        }

        let failed: Vec<String> = senders
            .iter()
            .zip(&alive)
            .filter(|(_, &ok)| !ok)
            .map(|((name, _), _)| name.clone())
            .collect();
        if !failed.is_empty() {
            let map: BTreeMap<String, ConsumerSender> = senders.into_iter().collect();
            self.remove_failed_senders(&failed, &map).await;
        }
        Ok(ResendTick::Retry)
    }

    /// Fetch exactly one record by id through the rereader.
    async fn reread(&self, id: RecordId, count: u32) -> Result<Option<Bytes>> {
        let mut rereader = self.rereader.lock().await;
        let read = async {
            rereader.seek(id.batch_id, id.batch_id).await?;
            rereader.read(count as usize).await
        }
        .await;
        let items = match read {
            Ok(items) => items,
            Err(e) => {
                error!(
                    subscription = %self.subscription_id,
                    error = %e,
                    "reread failed, shutting subscription down"
                );
                drop(rereader);
                self.mark_deleted().await;
                return Err(Error::ReaderFatal(e.to_string()));
            }
        };
        for item in items {
            if let ReadItem::Batch { lsn, payloads } = item {
                if lsn == id.batch_id {
                    return Ok(payloads.into_iter().nth(id.batch_index as usize));
                }
            }
        }
        Ok(None)
    }

    /// Drop senders that failed, unless the consumer re-attached with a
    /// fresh session in the meantime.
    async fn remove_failed_senders(
        &self,
        failed: &[String],
        observed: &BTreeMap<String, ConsumerSender>,
    ) {
        let mut state = self.state.lock().await;
        for name in failed {
            let stale = match (state.stream_sends.get(name), observed.get(name)) {
                (Some(current), Some(seen)) => current.same_channel(seen),
                _ => false,
            };
            if stale {
                state.stream_sends.remove(name);
                info!(subscription = %self.subscription_id, consumer = %name, "consumer dropped after send failure");
            }
        }
    }

    pub fn log_id(&self) -> LogId {
        self.log_id
    }
}
