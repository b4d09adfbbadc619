//! Reader and client traits over the underlying log store.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use rill_common::{LogId, Lsn};

/// Why a gap was reported for an LSN range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// Records removed by retention.
    Trim,
    /// Records the log can no longer serve.
    DataLoss,
}

/// One item returned by a read.
///
/// A `Batch` is always delivered whole: the records of one LSN are never
/// split across reads, so `payloads.len()` is the authoritative record
/// count of that batch. The `max` passed to a read bounds the total record
/// count but a single oversized batch is still returned in full.
#[derive(Debug, Clone)]
pub enum ReadItem {
    Batch { lsn: Lsn, payloads: Vec<Bytes> },
    Gap { kind: GapKind, lo: Lsn, hi: Lsn },
}

/// Client handle onto the log store.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Resolve the log backing a stream. Fails with `StreamNotFound` for
    /// unknown streams.
    async fn stream_log_id(&self, stream_name: &str) -> Result<LogId>;

    /// The highest LSN ever assigned in the log; one less than the next
    /// assignment. Zero for an empty log.
    async fn tail_lsn(&self, log: LogId) -> Result<Lsn>;

    /// Open a named checkpointed reader. The name scopes the durable
    /// checkpoint, so a reader reopened under the same name resumes where
    /// its predecessor checkpointed.
    async fn open_checkpointed_reader(
        &self,
        log: LogId,
        reader_name: &str,
    ) -> Result<Box<dyn CheckpointedReader>>;

    /// Open a plain positionable reader.
    async fn open_reader(&self, log: LogId) -> Result<Box<dyn LogReader>>;
}

/// Forward reader whose position survives restarts via a checkpoint.
#[async_trait]
pub trait CheckpointedReader: Send {
    /// Begin reading. Resumes one past the stored checkpoint when present,
    /// else at `fallback`. Returns the LSN reading actually starts from.
    /// Reads are non-blocking after this call.
    async fn start(&mut self, fallback: Lsn, until: Lsn) -> Result<Lsn>;

    /// Read whatever is currently available, up to roughly `max` records.
    /// Returns an empty vec when the log has nothing new.
    async fn read(&mut self, max: usize) -> Result<Vec<ReadItem>>;

    /// Durably record that everything up to and including `lsn` has been
    /// processed.
    async fn write_checkpoint(&mut self, lsn: Lsn) -> Result<()>;
}

/// Plain reader used for positioned rereads.
#[async_trait]
pub trait LogReader: Send {
    /// Position the reader on the inclusive LSN range `[start, until]`.
    async fn seek(&mut self, start: Lsn, until: Lsn) -> Result<()>;

    /// Read whatever is available in the seeked range, up to roughly `max`
    /// records.
    async fn read(&mut self, max: usize) -> Result<Vec<ReadItem>>;
}
