//! Log storage abstraction for Rill.
//!
//! The subscription engine consumes an ordered, replicated log through the
//! traits in this crate: a checkpointed reader for forward consumption, a
//! plain reader for positioned rereads, and gap reporting for LSN ranges
//! the log cannot deliver (trimmed or lost).

pub mod error;
pub mod log;
pub mod memory;

pub use error::{LogError, Result};
pub use log::{CheckpointedReader, GapKind, LogClient, LogReader, ReadItem};
pub use memory::MemoryLog;
