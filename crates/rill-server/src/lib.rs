//! Rill subscription delivery engine.
//!
//! The per-subscription runtime that reads ordered records from the log,
//! fans them out across dynamically attached consumers, folds
//! acknowledgments into a sparse range set, advances a checkpointed
//! delivery window and re-delivers records left unacked past the ack
//! timeout.

pub mod config;
pub mod registry;
pub mod service;
pub mod streaming_fetch;
pub mod subscription;

pub use config::EngineConfig;
pub use registry::SubscriptionRegistry;
pub use service::SubscriptionService;
pub use subscription::{ConsumerSender, RuntimeSnapshot, SubscriptionRuntime};
