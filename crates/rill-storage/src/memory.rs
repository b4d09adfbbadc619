//! In-memory log store.
//!
//! Backs tests and embedded single-process deployments. Each log assigns
//! contiguous LSNs starting at `LSN_MIN`; one append of N payloads is one
//! batch under one LSN. Trimming removes batches and makes subsequent
//! reads over the trimmed range report a `Gap`.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LogError, Result};
use crate::log::{CheckpointedReader, GapKind, LogClient, LogReader, ReadItem};
use rill_common::{LogId, Lsn, LSN_MIN};

#[derive(Default)]
struct LogState {
    batches: BTreeMap<Lsn, Vec<Bytes>>,
    next_lsn: Lsn,
    /// Highest trimmed LSN; zero when nothing was trimmed.
    trim_point: Lsn,
}

#[derive(Default)]
struct Store {
    next_log_id: LogId,
    streams: HashMap<String, LogId>,
    logs: HashMap<LogId, LogState>,
    checkpoints: HashMap<LogId, HashMap<String, Lsn>>,
}

impl Store {
    fn log(&self, id: LogId) -> Result<&LogState> {
        self.logs.get(&id).ok_or(LogError::LogNotFound(id))
    }

    fn log_mut(&mut self, id: LogId) -> Result<&mut LogState> {
        self.logs.get_mut(&id).ok_or(LogError::LogNotFound(id))
    }
}

/// In-memory multi-log store.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<RwLock<Store>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream and its backing log. Returns the existing log when
    /// the stream is already present.
    pub async fn create_stream(&self, name: &str) -> LogId {
        let mut store = self.inner.write().await;
        if let Some(&id) = store.streams.get(name) {
            return id;
        }
        store.next_log_id += 1;
        let id = store.next_log_id;
        store.streams.insert(name.to_string(), id);
        store.logs.insert(
            id,
            LogState { batches: BTreeMap::new(), next_lsn: LSN_MIN, trim_point: 0 },
        );
        debug!(stream = name, log = id, "created stream");
        id
    }

    /// Append one batch; every payload shares the returned LSN.
    pub async fn append(&self, log: LogId, payloads: Vec<Bytes>) -> Result<Lsn> {
        let mut store = self.inner.write().await;
        let state = store.log_mut(log)?;
        let lsn = state.next_lsn;
        state.next_lsn += 1;
        state.batches.insert(lsn, payloads);
        Ok(lsn)
    }

    /// Drop every batch with LSN `<= up_to`. Readers crossing the removed
    /// range observe a trim gap.
    pub async fn trim(&self, log: LogId, up_to: Lsn) -> Result<()> {
        let mut store = self.inner.write().await;
        let state = store.log_mut(log)?;
        let up_to = up_to.min(state.next_lsn.saturating_sub(1));
        state.batches.retain(|&lsn, _| lsn > up_to);
        state.trim_point = state.trim_point.max(up_to);
        Ok(())
    }

    /// Stored checkpoint of a named reader, for tests and diagnostics.
    pub async fn checkpoint_for(&self, log: LogId, reader_name: &str) -> Option<Lsn> {
        let store = self.inner.read().await;
        store.checkpoints.get(&log)?.get(reader_name).copied()
    }
}

/// Shared read path. Returns the items plus the position one past what was
/// consumed. Batches are never split; `max` bounds the total record count
/// except that a single oversized batch is still returned whole.
fn read_from(state: &LogState, mut next: Lsn, until: Lsn, max: usize) -> (Vec<ReadItem>, Lsn) {
    let mut items = Vec::new();
    if next <= state.trim_point && next <= until {
        let hi = state.trim_point.min(until);
        items.push(ReadItem::Gap { kind: GapKind::Trim, lo: next, hi });
        next = hi + 1;
    }
    let mut taken = 0usize;
    for (&lsn, payloads) in state.batches.range(next..) {
        if lsn > until {
            break;
        }
        if taken > 0 && taken + payloads.len() > max {
            break;
        }
        taken += payloads.len();
        items.push(ReadItem::Batch { lsn, payloads: payloads.clone() });
        next = lsn + 1;
        if taken >= max {
            break;
        }
    }
    (items, next)
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn stream_log_id(&self, stream_name: &str) -> Result<LogId> {
        let store = self.inner.read().await;
        store
            .streams
            .get(stream_name)
            .copied()
            .ok_or_else(|| LogError::StreamNotFound(stream_name.to_string()))
    }

    async fn tail_lsn(&self, log: LogId) -> Result<Lsn> {
        let store = self.inner.read().await;
        Ok(store.log(log)?.next_lsn - 1)
    }

    async fn open_checkpointed_reader(
        &self,
        log: LogId,
        reader_name: &str,
    ) -> Result<Box<dyn CheckpointedReader>> {
        let store = self.inner.read().await;
        store.log(log)?;
        Ok(Box::new(MemoryCheckpointedReader {
            store: self.inner.clone(),
            log,
            name: reader_name.to_string(),
            next: LSN_MIN,
            // Reads deliver nothing until start() positions the reader.
            until: 0,
        }))
    }

    async fn open_reader(&self, log: LogId) -> Result<Box<dyn LogReader>> {
        let store = self.inner.read().await;
        store.log(log)?;
        Ok(Box::new(MemoryLogReader {
            store: self.inner.clone(),
            log,
            next: LSN_MIN,
            until: 0,
        }))
    }
}

struct MemoryCheckpointedReader {
    store: Arc<RwLock<Store>>,
    log: LogId,
    name: String,
    next: Lsn,
    until: Lsn,
}

#[async_trait]
impl CheckpointedReader for MemoryCheckpointedReader {
    async fn start(&mut self, fallback: Lsn, until: Lsn) -> Result<Lsn> {
        let store = self.store.read().await;
        store.log(self.log)?;
        self.next = store
            .checkpoints
            .get(&self.log)
            .and_then(|per_reader| per_reader.get(&self.name))
            .map(|&ckpt| ckpt + 1)
            .unwrap_or(fallback);
        self.until = until;
        Ok(self.next)
    }

    async fn read(&mut self, max: usize) -> Result<Vec<ReadItem>> {
        let store = self.store.read().await;
        let state = store.log(self.log)?;
        let (items, next) = read_from(state, self.next, self.until, max);
        self.next = next;
        Ok(items)
    }

    async fn write_checkpoint(&mut self, lsn: Lsn) -> Result<()> {
        let mut store = self.store.write().await;
        store.log(self.log)?;
        store
            .checkpoints
            .entry(self.log)
            .or_default()
            .insert(self.name.clone(), lsn);
        Ok(())
    }
}

struct MemoryLogReader {
    store: Arc<RwLock<Store>>,
    log: LogId,
    next: Lsn,
    until: Lsn,
}

#[async_trait]
impl LogReader for MemoryLogReader {
    async fn seek(&mut self, start: Lsn, until: Lsn) -> Result<()> {
        if start > until {
            return Err(LogError::InvalidRange { start, until });
        }
        self.next = start;
        self.until = until;
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Vec<ReadItem>> {
        let store = self.store.read().await;
        let state = store.log(self.log)?;
        let (items, next) = read_from(state, self.next, self.until, max);
        self.next = next;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(values: &[&str]) -> Vec<Bytes> {
        values.iter().map(|v| Bytes::copy_from_slice(v.as_bytes())).collect()
    }

    #[tokio::test]
    async fn append_assigns_contiguous_lsns() {
        let log = MemoryLog::new();
        let id = log.create_stream("s").await;
        assert_eq!(log.append(id, payloads(&["a"])).await.unwrap(), 1);
        assert_eq!(log.append(id, payloads(&["b", "c"])).await.unwrap(), 2);
        assert_eq!(log.tail_lsn(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn checkpointed_reader_reads_whole_batches() {
        let log = MemoryLog::new();
        let id = log.create_stream("s").await;
        log.append(id, payloads(&["a", "b"])).await.unwrap();
        log.append(id, payloads(&["c"])).await.unwrap();

        let mut reader = log.open_checkpointed_reader(id, "r").await.unwrap();
        assert_eq!(reader.start(LSN_MIN, u64::MAX).await.unwrap(), LSN_MIN);

        let items = reader.read(100).await.unwrap();
        assert_eq!(items.len(), 2);
        match &items[0] {
            ReadItem::Batch { lsn, payloads } => {
                assert_eq!(*lsn, 1);
                assert_eq!(payloads.len(), 2);
            }
            other => panic!("expected batch, got {other:?}"),
        }

        // Nothing new: non-blocking empty read.
        assert!(reader.read(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_limit_does_not_split_batches() {
        let log = MemoryLog::new();
        let id = log.create_stream("s").await;
        log.append(id, payloads(&["a", "b", "c"])).await.unwrap();
        log.append(id, payloads(&["d"])).await.unwrap();

        let mut reader = log.open_checkpointed_reader(id, "r").await.unwrap();
        reader.start(LSN_MIN, u64::MAX).await.unwrap();

        // A limit of 2 is smaller than the first batch, which is still
        // returned whole; the second batch waits for the next read.
        let items = reader.read(2).await.unwrap();
        assert_eq!(items.len(), 1);
        let items = reader.read(2).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn trim_produces_gap_then_data() {
        let log = MemoryLog::new();
        let id = log.create_stream("s").await;
        for v in ["a", "b", "c"] {
            log.append(id, payloads(&[v])).await.unwrap();
        }
        log.trim(id, 2).await.unwrap();

        let mut reader = log.open_checkpointed_reader(id, "r").await.unwrap();
        reader.start(LSN_MIN, u64::MAX).await.unwrap();
        let items = reader.read(100).await.unwrap();
        assert_eq!(items.len(), 2);
        match &items[0] {
            ReadItem::Gap { kind, lo, hi } => {
                assert_eq!(*kind, GapKind::Trim);
                assert_eq!((*lo, *hi), (1, 2));
            }
            other => panic!("expected gap, got {other:?}"),
        }
        match &items[1] {
            ReadItem::Batch { lsn, .. } => assert_eq!(*lsn, 3),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn checkpoint_positions_a_reopened_reader() {
        let log = MemoryLog::new();
        let id = log.create_stream("s").await;
        for v in ["a", "b", "c"] {
            log.append(id, payloads(&[v])).await.unwrap();
        }

        let mut reader = log.open_checkpointed_reader(id, "r").await.unwrap();
        reader.start(LSN_MIN, u64::MAX).await.unwrap();
        reader.read(100).await.unwrap();
        reader.write_checkpoint(2).await.unwrap();
        assert_eq!(log.checkpoint_for(id, "r").await, Some(2));

        let mut reopened = log.open_checkpointed_reader(id, "r").await.unwrap();
        assert_eq!(reopened.start(LSN_MIN, u64::MAX).await.unwrap(), 3);
        let items = reopened.read(100).await.unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            ReadItem::Batch { lsn, .. } => assert_eq!(*lsn, 3),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rereader_seeks_a_single_batch() {
        let log = MemoryLog::new();
        let id = log.create_stream("s").await;
        for v in ["a", "b", "c"] {
            log.append(id, payloads(&[v])).await.unwrap();
        }

        let mut reader = log.open_reader(id).await.unwrap();
        reader.seek(2, 2).await.unwrap();
        let items = reader.read(100).await.unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            ReadItem::Batch { lsn, payloads } => {
                assert_eq!(*lsn, 2);
                assert_eq!(payloads[0], Bytes::from_static(b"b"));
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_stream_is_reported() {
        let log = MemoryLog::new();
        match log.stream_log_id("missing").await {
            Err(LogError::StreamNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("expected StreamNotFound, got {other:?}"),
        }
    }
}
