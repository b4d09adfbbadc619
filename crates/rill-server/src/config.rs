//! Engine configuration.

use std::time::Duration;

/// Tunables for the subscription delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on records pulled from the log per dispatch iteration.
    pub max_poll_records: usize,
    /// Pacing between dispatch iterations of one subscription.
    pub dispatch_interval: Duration,
    /// Messages buffered on each direction of a streaming-fetch session's
    /// channels.
    pub consumer_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_poll_records: 1000,
            dispatch_interval: Duration::from_secs(1),
            consumer_channel_capacity: 64,
        }
    }
}
