//! RPC boundary for the subscription engine.
//!
//! Engine errors stay typed internally and map to status codes only here.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use rill_common::{Error, Subscription};
use rill_common::metadata::MetadataError;
use rill_protocol::{FetchRequest, FetchResponse, Status};

use crate::registry::SubscriptionRegistry;
use crate::streaming_fetch;

/// Facade exposing the subscription RPC surface over a registry.
pub struct SubscriptionService {
    registry: Arc<SubscriptionRegistry>,
}

impl SubscriptionService {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub async fn create_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, Status> {
        info!(subscription = %subscription.id, "create subscription");
        self.registry.create(subscription).await.map_err(to_status)
    }

    pub async fn delete_subscription(&self, id: &str) -> Result<(), Status> {
        info!(subscription = %id, "delete subscription");
        self.registry.delete(id).await.map_err(to_status)
    }

    pub async fn check_subscription_exists(&self, id: &str) -> Result<bool, Status> {
        self.registry.exists(id).await.map_err(to_status)
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>, Status> {
        self.registry.list().await.map_err(to_status)
    }

    /// Channel pair backing one streaming-fetch session, both directions
    /// sized from the engine configuration.
    pub fn session_transport(
        &self,
    ) -> (
        (mpsc::Sender<FetchRequest>, mpsc::Receiver<FetchRequest>),
        (mpsc::Sender<FetchResponse>, mpsc::Receiver<FetchResponse>),
    ) {
        let capacity = self.registry.config().consumer_channel_capacity;
        (mpsc::channel(capacity), mpsc::channel(capacity))
    }

    /// Serve one bidirectional streaming-fetch session.
    pub async fn streaming_fetch(
        &self,
        requests: mpsc::Receiver<FetchRequest>,
        responses: mpsc::Sender<FetchResponse>,
    ) -> Result<(), Status> {
        streaming_fetch::run_session(&self.registry, requests, responses).await
    }
}

/// Map an engine error onto the status codes of the RPC surface.
fn to_status(error: Error) -> Status {
    match error {
        Error::SubscriptionNotFound(id) => Status::not_found(format!("subscription {id}")),
        Error::StreamNotFound(name) => Status::not_found(format!("stream {name}")),
        Error::Metadata(MetadataError::NotFound(what)) => Status::not_found(what),
        Error::Metadata(MetadataError::AlreadyExists(what)) => Status::already_exists(what),
        Error::SubscriptionRemoved => Status::internal("Subscription has been removed"),
        other => Status::internal(other.to_string()),
    }
}
