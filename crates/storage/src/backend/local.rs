//! Local filesystem store.
//!
//! Each partition is a directory beneath the store root. Each entry is a pair
//! of files named after the BLAKE3 hash of its key: `<hash>.body` holds the raw
//! response bytes and `<hash>.meta` a small JSON document with the key, status,
//! headers and receive time. Hashing keeps arbitrary keys (query strings,
//! nested paths, the root alias) off the filesystem namespace entirely.

use crate::backend::KeyStream;
use crate::error::{ErrorKind, Result};
use crate::{CacheStore, Partition, Response};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use shellcache_manifest::ResourceKey;
use std::collections::BTreeMap;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use time::UtcDateTime;
use tokio::fs;

const META_EXT: &str = "meta";
const BODY_EXT: &str = "body";
const TMP_EXT: &str = "tmp";

/// Distinguishes temporary files of writers racing on the same entry.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize)]
struct Meta {
    key: ResourceKey,
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Unix timestamp, seconds
    received_at: i64,
    /// BLAKE3 of the body this metadata was written with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_hash: Option<String>,
}

fn body_hash(body: &[u8]) -> String {
    blake3::hash(body).to_hex().to_string()
}

/// Local filesystem store.
///
/// # Examples
///
/// ```no_run
/// use shellcache_storage::backend::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalStore::new("local", "/var/cache/shellcache")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalStore {
    name: String,
    root: PathBuf,
}
impl LocalStore {
    /// Create a new local filesystem store, creating the root directory if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }

        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it only happens once when the store is
            // opened and it's not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }

        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.root.join(partition.as_str())
    }

    fn entry_path(&self, partition: Partition, key: &ResourceKey, ext: &str) -> PathBuf {
        let hash = blake3::hash(key.as_str().as_bytes()).to_hex();
        self.partition_dir(partition).join(format!("{hash}.{ext}"))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Read a file, treating a missing file as `None`.
    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    /// Remove a file, reporting whether it existed.
    async fn remove_optional(path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    /// Write to a sibling temporary file, then rename over the destination so
    /// readers never observe a half-written file. Every call gets its own
    /// temporary file; concurrent writers of one entry each rename a complete
    /// file and the last rename wins.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let unique = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{}-{unique}.{TMP_EXT}", std::process::id()));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data).await.map_err(|e| Self::map_io_error(e, &tmp))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            exn::bail!(Self::map_io_error(e, path));
        }
        Ok(())
    }

    fn decode_meta(partition: Partition, path: &Path, bytes: &[u8]) -> Result<Meta> {
        serde_json::from_slice(bytes)
            .or_raise(|| ErrorKind::Corrupt(partition, format!("unreadable metadata in {}", path.display())))
    }

    /// Loads the key out of a metadata file found while listing a partition.
    /// Files that vanish between listing and reading are skipped.
    async fn key_from_meta(partition: Partition, path: &Path) -> Result<Option<ResourceKey>> {
        let Some(bytes) = Self::read_optional(path).await? else {
            return Ok(None);
        };
        Ok(Some(Self::decode_meta(partition, path, &bytes)?.key))
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "trace", skip(self), fields(store = %self.name))]
    async fn get(&self, partition: Partition, key: &ResourceKey) -> Result<Option<Response>> {
        let meta_path = self.entry_path(partition, key, META_EXT);
        let Some(meta_bytes) = Self::read_optional(&meta_path).await? else {
            return Ok(None);
        };
        let meta = Self::decode_meta(partition, &meta_path, &meta_bytes)?;
        if &meta.key != key {
            exn::bail!(ErrorKind::Corrupt(partition, format!("entry for `{}` found under `{key}`", meta.key)));
        }
        // A body missing after its metadata was written means a delete raced
        // this read; treat the entry as gone.
        let Some(body) = Self::read_optional(&self.entry_path(partition, key, BODY_EXT)).await? else {
            return Ok(None);
        };
        // Racing writers can leave one writer's body beside another's
        // metadata. Such a pair is never served; the next fill replaces it.
        if meta.body_hash.as_ref().is_some_and(|expected| *expected != body_hash(&body)) {
            tracing::debug!(%partition, %key, "Body does not match its metadata; treating entry as absent");
            return Ok(None);
        }
        let received_at = UtcDateTime::from_unix_timestamp(meta.received_at)
            .or_raise(|| ErrorKind::Corrupt(partition, format!("invalid timestamp for `{key}`")))?;
        Ok(Some(Response {
            status: meta.status,
            headers: meta.headers,
            body,
            received_at,
        }))
    }

    async fn contains(&self, partition: Partition, key: &ResourceKey) -> Result<bool> {
        let meta_path = self.entry_path(partition, key, META_EXT);
        Ok(fs::try_exists(&meta_path).await.map_err(|e| Self::map_io_error(e, &meta_path))?)
    }

    #[tracing::instrument(level = "trace", skip(self, response), fields(store = %self.name))]
    async fn put(&self, partition: Partition, key: &ResourceKey, response: &Response) -> Result<()> {
        let dir = self.partition_dir(partition);
        fs::create_dir_all(&dir).await.map_err(|e| Self::map_io_error(e, &dir))?;
        let meta = Meta {
            key: key.clone(),
            status: response.status,
            headers: response.headers.clone(),
            received_at: response.received_at.unix_timestamp(),
            body_hash: Some(body_hash(&response.body)),
        };
        let meta_bytes = serde_json::to_vec(&meta).or_raise(|| ErrorKind::Serialization)?;
        // Body first: an entry only becomes visible once its metadata lands.
        Self::write_atomic(&self.entry_path(partition, key, BODY_EXT), &response.body).await?;
        Self::write_atomic(&self.entry_path(partition, key, META_EXT), &meta_bytes).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self), fields(store = %self.name))]
    async fn delete(&self, partition: Partition, key: &ResourceKey) -> Result<bool> {
        let existed = Self::remove_optional(&self.entry_path(partition, key, META_EXT)).await?;
        Self::remove_optional(&self.entry_path(partition, key, BODY_EXT)).await?;
        Ok(existed)
    }

    fn keys_stream<'a>(&'a self, partition: Partition) -> KeyStream<'a> {
        let dir = self.partition_dir(partition);
        Box::pin(stream! {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A partition that was never written to is simply empty.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
                Err(err) => {
                    yield Err(exn::Exn::from(Self::map_io_error(err, &dir)));
                    return;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &dir))); continue; },
                };
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXT) {
                    continue;
                }
                match Self::key_from_meta(partition, &path).await {
                    Ok(Some(key)) => yield Ok(key),
                    Ok(None) => {},
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    #[tracing::instrument(level = "debug", skip(self), fields(store = %self.name))]
    async fn delete_partition(&self, partition: Partition) -> Result<()> {
        let dir = self.partition_dir(partition);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io_error(e, &dir).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> ResourceKey {
        ResourceKey::new(k)
    }

    fn store() -> (tempfile::TempDir, LocalStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("local", temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalStore::new("name", temp_dir.path()).is_ok());
        assert!(LocalStore::new("name", "relative/path").is_err());
        assert!(LocalStore::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/cache");
        LocalStore::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"data").unwrap();
        let err = LocalStore::new("name", &file).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_dir, store) = store();
        let response = Response::ok("console.log(1)")
            .with_header("Content-Type", "text/javascript")
            .with_received_at(UtcDateTime::from_unix_timestamp(1_714_564_800).unwrap());
        store.put(Partition::Content, &key("main.dart.js"), &response).await.unwrap();
        let read = store.get(Partition::Content, &key("main.dart.js")).await.unwrap().unwrap();
        assert_eq!(read, response);
        assert!(store.get(Partition::Content, &key("other.js")).await.unwrap().is_none());
        assert!(store.get(Partition::Staging, &key("main.dart.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_layout_on_disk() {
        let (dir, store) = store();
        store.put(Partition::Staging, &key("/"), &Response::ok("<html>")).await.unwrap();
        let hash = blake3::hash(b"/").to_hex();
        let staging = dir.path().join("staging");
        assert!(staging.join(format!("{hash}.meta")).is_file());
        assert_eq!(std::fs::read(staging.join(format!("{hash}.body"))).unwrap(), b"<html>");
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_keys_with_queries_and_nesting() {
        let (_dir, store) = store();
        for k in ["/", "assets/fonts/icons.otf", "data.json?page=2"] {
            store.put(Partition::Content, &key(k), &Response::ok(k)).await.unwrap();
        }
        let keys = store.keys(Partition::Content).await.unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![key("/"), key("assets/fonts/icons.otf"), key("data.json?page=2")]
        );
        let read = store.get(Partition::Content, &key("data.json?page=2")).await.unwrap().unwrap();
        assert_eq!(read.body, b"data.json?page=2");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, store) = store();
        store.put(Partition::Content, &key("a.js"), &Response::ok("old")).await.unwrap();
        store.put(Partition::Content, &key("a.js"), &Response::ok("new")).await.unwrap();
        let read = store.get(Partition::Content, &key("a.js")).await.unwrap().unwrap();
        assert_eq!(read.body, b"new");
        assert_eq!(store.keys(Partition::Content).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = store();
        store.put(Partition::Content, &key("a.js"), &Response::ok("x")).await.unwrap();
        assert!(store.contains(Partition::Content, &key("a.js")).await.unwrap());
        assert!(store.delete(Partition::Content, &key("a.js")).await.unwrap());
        assert!(!store.contains(Partition::Content, &key("a.js")).await.unwrap());
        assert!(!store.delete(Partition::Content, &key("a.js")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_body_reads_as_absent() {
        let (_dir, store) = store();
        store.put(Partition::Content, &key("a.js"), &Response::ok("x")).await.unwrap();
        std::fs::remove_file(store.entry_path(Partition::Content, &key("a.js"), BODY_EXT)).unwrap();
        assert!(store.get(Partition::Content, &key("a.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_meta() {
        let (_dir, store) = store();
        store.put(Partition::Content, &key("a.js"), &Response::ok("x")).await.unwrap();
        std::fs::write(store.entry_path(Partition::Content, &key("a.js"), META_EXT), b"{not json").unwrap();
        let err = store.get(Partition::Content, &key("a.js")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corrupt(Partition::Content, _)));
        assert!(store.keys(Partition::Content).await.is_err());
    }

    #[tokio::test]
    async fn test_mismatched_body_reads_as_absent() {
        let (_dir, store) = store();
        store.put(Partition::Content, &key("a.js"), &Response::ok("x")).await.unwrap();
        std::fs::write(store.entry_path(Partition::Content, &key("a.js"), BODY_EXT), b"someone else's").unwrap();
        assert!(store.get(Partition::Content, &key("a.js")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_of_one_key() {
        let (dir, store) = store();
        let store = std::sync::Arc::new(store);
        let mut tasks = tokio::task::JoinSet::new();
        for writer in 0..32 {
            let store = store.clone();
            tasks.spawn(async move {
                let response = Response::ok("void main() {}").with_header("x-writer", writer.to_string());
                store.put(Partition::Content, &key("main.dart.js"), &response).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
        let read = store.get(Partition::Content, &key("main.dart.js")).await.unwrap().unwrap();
        assert_eq!(read.body, b"void main() {}");
        assert!(read.header("x-writer").is_some());
        // Only the final pair remains; every temporary file was renamed away
        assert_eq!(std::fs::read_dir(dir.path().join("content")).unwrap().count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_never_serve_a_mixed_entry() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let mut tasks = tokio::task::JoinSet::new();
        for writer in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                let response = Response::ok(format!("body {writer}")).with_header("x-writer", writer.to_string());
                store.put(Partition::Content, &key("a.js"), &response).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
        if let Some(read) = store.get(Partition::Content, &key("a.js")).await.unwrap() {
            let writer = read.header("x-writer").unwrap();
            assert_eq!(read.body, format!("body {writer}").into_bytes());
        }
    }

    #[tokio::test]
    async fn test_keys_of_missing_partition() {
        let (_dir, store) = store();
        assert!(store.keys(Partition::ManifestRecord).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_partition() {
        let (dir, store) = store();
        store.put(Partition::Content, &key("a.js"), &Response::ok("x")).await.unwrap();
        store.put(Partition::Staging, &key("a.js"), &Response::ok("y")).await.unwrap();
        store.delete_partition(Partition::Content).await.unwrap();
        assert!(!dir.path().join("content").exists());
        assert!(store.keys(Partition::Content).await.unwrap().is_empty());
        assert!(store.contains(Partition::Staging, &key("a.js")).await.unwrap());
        // Idempotent
        store.delete_partition(Partition::Content).await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_sees_entries() {
        let (dir, store) = store();
        store.put(Partition::ManifestRecord, &key("manifest"), &Response::ok("{}")).await.unwrap();
        drop(store);
        let reopened = LocalStore::new("local", dir.path()).unwrap();
        assert!(reopened.contains(Partition::ManifestRecord, &key("manifest")).await.unwrap());
    }
}
