//! In-memory implementation of the subscription store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::traits::{MetadataError, Result, SubscriptionStore};
use crate::types::Subscription;

/// In-memory `SubscriptionStore` for tests and embedded use.
///
/// Entries are held JSON-encoded so the serialize step of the persistence
/// layout stays on the hot path even without a real KV behind it.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(id: &str, value: &serde_json::Value) -> Result<Subscription> {
        serde_json::from_value(value.clone())
            .map_err(|e| MetadataError::SerializationError(format!("subscription {id}: {e}")))
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn create(&self, subscription: &Subscription) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&subscription.id) {
            return Err(MetadataError::AlreadyExists(subscription.id.clone()));
        }
        let encoded = serde_json::to_value(subscription)
            .map_err(|e| MetadataError::SerializationError(e.to_string()))?;
        entries.insert(subscription.id.clone(), encoded);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Subscription>> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .map(|value| Self::decode(id, value))
            .transpose()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let entries = self.entries.read().await;
        Ok(entries.contains_key(id))
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(id, value)| Self::decode(id, value))
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MetadataError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscriptionOffset;

    fn sub(id: &str) -> Subscription {
        Subscription::new(id, "stream-a", 60, SubscriptionOffset::Earliest)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySubscriptionStore::new();
        store.create(&sub("s1")).await.unwrap();

        let fetched = store.get("s1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "s1");
        assert_eq!(fetched.stream_name, "stream-a");
        assert!(store.exists("s1").await.unwrap());
        assert!(!store.exists("s2").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = MemorySubscriptionStore::new();
        store.create(&sub("s1")).await.unwrap();
        match store.create(&sub("s1")).await {
            Err(MetadataError::AlreadyExists(id)) => assert_eq!(id, "s1"),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemorySubscriptionStore::new();
        match store.delete("nope").await {
            Err(MetadataError::NotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_returns_all_entries() {
        let store = MemorySubscriptionStore::new();
        store.create(&sub("a")).await.unwrap();
        store.create(&sub("b")).await.unwrap();
        let mut ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
