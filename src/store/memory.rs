use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::Store;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn fresh(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process `Store`. Safe for concurrent callers; expired entries are
/// treated as absent on read rather than being eagerly reaped, matching
/// the reference `MemoryStore`'s lazy-expiry reads.
#[derive(Default)]
pub struct MemoryStore {
    routes: RwLock<HashMap<String, Entry<String>>>,
    processed: RwLock<HashMap<String, Entry<()>>>,
    acks: RwLock<HashMap<String, Entry<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_route(&self, target_id: &str, sdk_url: &str) -> Result<(), StoreError> {
        self.routes.write().await.insert(
            target_id.to_owned(),
            Entry::fresh(sdk_url.to_owned(), super::DEFAULT_TTL),
        );
        Ok(())
    }

    async fn get_route(&self, target_id: &str) -> Result<String, StoreError> {
        let routes = self.routes.read().await;
        Ok(routes
            .get(target_id)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone())
            .unwrap_or_default())
    }

    async fn is_processed(&self, msg_id: &str) -> Result<bool, StoreError> {
        let processed = self.processed.read().await;
        Ok(processed
            .get(msg_id)
            .is_some_and(Entry::is_live))
    }

    async fn mark_processed(&self, msg_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.processed
            .write()
            .await
            .insert(msg_id.to_owned(), Entry::fresh((), ttl));
        Ok(())
    }

    async fn set_ack_status(
        &self,
        msg_id: &str,
        status: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.acks
            .write()
            .await
            .insert(msg_id.to_owned(), Entry::fresh(status.to_owned(), ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_route_is_empty_string_not_error_when_absent() {
        let store = MemoryStore::new();
        assert_eq!(store.get_route("T1").await.unwrap(), "");
    }

    #[tokio::test]
    async fn set_route_then_get_route_round_trips() {
        let store = MemoryStore::new();
        store.set_route("T1", "ws://sdk/a").await.unwrap();
        assert_eq!(store.get_route("T1").await.unwrap(), "ws://sdk/a");
    }

    #[tokio::test]
    async fn set_route_overwrites_prior_value() {
        let store = MemoryStore::new();
        store.set_route("T1", "ws://sdk/a").await.unwrap();
        store.set_route("T1", "ws://sdk/b").await.unwrap();
        assert_eq!(store.get_route("T1").await.unwrap(), "ws://sdk/b");
    }

    #[tokio::test]
    async fn mark_processed_then_is_processed_true_until_ttl_expires() {
        let store = MemoryStore::new();
        assert!(!store.is_processed("m1").await.unwrap());
        store
            .mark_processed("m1", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.is_processed("m1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.is_processed("m1").await.unwrap());
    }

    #[tokio::test]
    async fn set_ack_status_is_idempotent_and_overwritable() {
        let store = MemoryStore::new();
        store
            .set_ack_status("m1", "done", super::super::DEFAULT_TTL)
            .await
            .unwrap();
        store
            .set_ack_status("m1", "done", super::super::DEFAULT_TTL)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_writers_to_distinct_keys_all_land() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set_route(&format!("T{i}"), &format!("ws://sdk/{i}"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for i in 0..50 {
            assert_eq!(
                store.get_route(&format!("T{i}")).await.unwrap(),
                format!("ws://sdk/{i}")
            );
        }
    }
}
