//! Test support shared by the worker's modules.

use shellcache_manifest::{ResourceKey, Scope};
use shellcache_storage::backend::{CacheStore, KeyStream, MemoryStore};
use shellcache_storage::error::{ErrorKind, Result};
use shellcache_storage::{Partition, Response};
use std::sync::{Mutex, PoisonError};

/// Which store operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Get(Partition),
    Put(Partition),
    Delete,
    DeletePartition(Partition),
}

/// Wraps a [`MemoryStore`], failing one kind of operation on demand.
pub struct FailingStore {
    inner: MemoryStore,
    fail_on: Mutex<Option<FailOn>>,
}

impl FailingStore {
    pub fn new(inner: MemoryStore, fail_on: FailOn) -> Self {
        Self { inner, fail_on: Mutex::new(Some(fail_on)) }
    }

    /// Starts out healthy; arm it later with [`fail_on`](Self::fail_on).
    pub fn healthy(inner: MemoryStore) -> Self {
        Self { inner, fail_on: Mutex::new(None) }
    }

    pub fn fail_on(&self, fail_on: Option<FailOn>) {
        *self.fail_on.lock().unwrap_or_else(PoisonError::into_inner) = fail_on;
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, op: FailOn) -> Result<()> {
        if *self.fail_on.lock().unwrap_or_else(PoisonError::into_inner) == Some(op) {
            exn::bail!(ErrorKind::Backend(format!("injected failure: {op:?}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get(&self, partition: Partition, key: &ResourceKey) -> Result<Option<Response>> {
        self.check(FailOn::Get(partition))?;
        self.inner.get(partition, key).await
    }

    async fn put(&self, partition: Partition, key: &ResourceKey, response: &Response) -> Result<()> {
        self.check(FailOn::Put(partition))?;
        self.inner.put(partition, key, response).await
    }

    async fn delete(&self, partition: Partition, key: &ResourceKey) -> Result<bool> {
        self.check(FailOn::Delete)?;
        self.inner.delete(partition, key).await
    }

    fn keys_stream<'a>(&'a self, partition: Partition) -> KeyStream<'a> {
        self.inner.keys_stream(partition)
    }

    async fn delete_partition(&self, partition: Partition) -> Result<()> {
        self.check(FailOn::DeletePartition(partition))?;
        self.inner.delete_partition(partition).await
    }
}

pub fn scope() -> Scope {
    Scope::parse("https://app.example/").unwrap()
}

/// Absolute URL of `key` beneath [`scope()`].
pub fn url(key: &str) -> String {
    scope().url_for(&ResourceKey::new(key)).unwrap().to_string()
}
