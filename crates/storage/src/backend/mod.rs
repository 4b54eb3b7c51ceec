//! Store trait and implementations.
//!
//! [`CacheStore`] is the injected capability the reconciler, the request
//! interceptor and the offline task work against. Each operation is
//! individually atomic; nothing here offers (or needs) a cross-key
//! transaction.

mod local;
#[cfg(any(test, feature = "mock"))]
mod memory;

pub use self::local::LocalStore;
#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryStore;
use crate::error::Result;
use crate::{Partition, Response};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use shellcache_manifest::ResourceKey;
use std::collections::BTreeSet;
use std::pin::Pin;

pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = Result<ResourceKey>> + Send + 'a>>;

/// Unified interface for partitioned response stores.
///
/// Keys are always normalized [`ResourceKey`]s, so two requests for the same
/// resource can never land in two different entries.
///
/// # Examples
///
/// ```
/// use shellcache_manifest::ResourceKey;
/// use shellcache_storage::{CacheStore, Partition, error::Result};
///
/// async fn promote_one(store: &dyn CacheStore, key: &ResourceKey) -> Result<bool> {
///     match store.get(Partition::Staging, key).await? {
///         Some(response) => {
///             store.put(Partition::Content, key, &response).await?;
///             Ok(true)
///         },
///         None => Ok(false),
///     }
/// }
/// ```
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Name of the store, for logging only.
    fn name(&self) -> &str;

    /// Fetch an entry, or `None` if the partition has nothing under `key`.
    async fn get(&self, partition: Partition, key: &ResourceKey) -> Result<Option<Response>>;

    /// Check whether an entry exists.
    ///
    /// Default implementation reads the whole entry; backends that can
    /// answer more cheaply should override it.
    async fn contains(&self, partition: Partition, key: &ResourceKey) -> Result<bool> {
        Ok(self.get(partition, key).await?.is_some())
    }

    /// Store an entry, replacing any previous entry under the same key
    /// (last writer wins).
    async fn put(&self, partition: Partition, key: &ResourceKey, response: &Response) -> Result<()>;

    /// Remove an entry. Returns `false` if there was nothing to remove.
    async fn delete(&self, partition: Partition, key: &ResourceKey) -> Result<bool>;

    /// Stream every key currently stored in a partition.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use shellcache_storage::{CacheStore, Partition, error::Result};
    /// # async fn example(store: &dyn CacheStore) -> Result<()> {
    /// let mut keys = store.keys_stream(Partition::Content);
    /// while let Some(key) = keys.try_next().await? {
    ///     println!("cached: {key}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn keys_stream<'a>(&'a self, partition: Partition) -> KeyStream<'a>;

    /// Collect every key in a partition.
    ///
    /// Default implementation collects [`keys_stream()`](Self::keys_stream)
    /// into a [`BTreeSet`].
    async fn keys(&self, partition: Partition) -> Result<BTreeSet<ResourceKey>> {
        self.keys_stream(partition).try_collect().await
    }

    /// Drop an entire partition. Deleting an empty or missing partition
    /// succeeds.
    async fn delete_partition(&self, partition: Partition) -> Result<()>;
}
