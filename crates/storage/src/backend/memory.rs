//! In-memory store for testing.

use super::KeyStream;
use crate::error::Result;
use crate::{CacheStore, Partition, Response};
use async_stream::stream;
use async_trait::async_trait;
use shellcache_manifest::ResourceKey;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

type Entries = HashMap<ResourceKey, Response>;

/// In-memory store for testing.
///
/// Partitions are `HashMap`s behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Ideal for unit tests
/// that need a [`CacheStore`] without filesystem dependencies.
///
/// Only compiled for this crate's own tests, or for other crates enabling the
/// `mock` feature (typically as a dev-dependency).
pub struct MemoryStore {
    name: String,
    partitions: RwLock<HashMap<Partition, Entries>>,
}

impl MemoryStore {
    /// Create a store pre-populated with entries.
    pub fn with_entries(entries: impl IntoIterator<Item = (Partition, impl Into<ResourceKey>, Response)>) -> Self {
        let mut partitions: HashMap<Partition, Entries> = HashMap::new();
        for (partition, key, response) in entries {
            partitions.entry(partition).or_default().insert(key.into(), response);
        }
        Self {
            name: "memory".to_string(),
            partitions: RwLock::new(partitions),
        }
    }

    /// Change the name of the store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Copy of every entry in a partition, sorted by key. Handy for comparing
    /// whole partitions in assertions.
    pub async fn snapshot(&self, partition: Partition) -> BTreeMap<ResourceKey, Response> {
        let guard = self.partitions.read().await;
        guard
            .get(&partition)
            .map(|entries| entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Bodies of every entry in a partition, sorted by key.
    pub async fn bodies(&self, partition: Partition) -> BTreeMap<String, Vec<u8>> {
        self.snapshot(partition).await.into_iter().map(|(k, v)| (k.to_string(), v.body)).collect()
    }
}
impl Default for MemoryStore {
    fn default() -> Self {
        let entries: [(Partition, &str, Response); 0] = [];
        Self::with_entries(entries)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, partition: Partition, key: &ResourceKey) -> Result<Option<Response>> {
        let guard = self.partitions.read().await;
        Ok(guard.get(&partition).and_then(|entries| entries.get(key)).cloned())
    }

    async fn contains(&self, partition: Partition, key: &ResourceKey) -> Result<bool> {
        let guard = self.partitions.read().await;
        Ok(guard.get(&partition).is_some_and(|entries| entries.contains_key(key)))
    }

    async fn put(&self, partition: Partition, key: &ResourceKey, response: &Response) -> Result<()> {
        self.partitions.write().await.entry(partition).or_default().insert(key.clone(), response.clone());
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &ResourceKey) -> Result<bool> {
        let mut guard = self.partitions.write().await;
        Ok(guard.get_mut(&partition).is_some_and(|entries| entries.remove(key).is_some()))
    }

    fn keys_stream<'a>(&'a self, partition: Partition) -> KeyStream<'a> {
        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding to
            // avoid holding the lock across yield points.
            let keys: Vec<ResourceKey> = {
                let guard = self.partitions.read().await;
                guard.get(&partition).map(|entries| entries.keys().cloned().collect()).unwrap_or_default()
            };
            for key in keys {
                yield Ok(key);
            }
        })
    }

    async fn delete_partition(&self, partition: Partition) -> Result<()> {
        self.partitions.write().await.remove(&partition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> ResourceKey {
        ResourceKey::new(k)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::default();
        store.put(Partition::Content, &key("a.js"), &Response::ok("hello")).await.unwrap();
        let response = store.get(Partition::Content, &key("a.js")).await.unwrap().unwrap();
        assert_eq!(response.body, b"hello");
        assert!(store.get(Partition::Content, &key("b.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let store = MemoryStore::with_entries([(Partition::Staging, "a.js", Response::ok("staged"))]);
        assert!(store.get(Partition::Content, &key("a.js")).await.unwrap().is_none());
        store.delete_partition(Partition::Content).await.unwrap();
        assert!(store.contains(Partition::Staging, &key("a.js")).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::with_entries([(Partition::Content, "a.js", Response::ok("old"))]);
        store.put(Partition::Content, &key("a.js"), &Response::ok("new")).await.unwrap();
        assert_eq!(store.bodies(Partition::Content).await, BTreeMap::from([("a.js".to_string(), b"new".to_vec())]));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::with_entries([(Partition::Content, "a.js", Response::ok("x"))]);
        assert!(store.delete(Partition::Content, &key("a.js")).await.unwrap());
        assert!(!store.delete(Partition::Content, &key("a.js")).await.unwrap());
        // Deleting from a partition that was never created
        assert!(!store.delete(Partition::ManifestRecord, &key("a.js")).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys() {
        let store = MemoryStore::with_entries([
            (Partition::Content, "/", Response::ok("root")),
            (Partition::Content, "b.js", Response::ok("b")),
            (Partition::Staging, "c.js", Response::ok("c")),
        ]);
        let keys = store.keys(Partition::Content).await.unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec![ResourceKey::root(), key("b.js")]);
        assert!(store.keys(Partition::ManifestRecord).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_partition_is_idempotent() {
        let store = MemoryStore::with_entries([(Partition::Content, "a.js", Response::ok("x"))]);
        store.delete_partition(Partition::Content).await.unwrap();
        store.delete_partition(Partition::Content).await.unwrap();
        assert!(store.keys(Partition::Content).await.unwrap().is_empty());
    }
}
