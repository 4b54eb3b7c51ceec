//! Reconciling the durable cache against a newly activated manifest.
//!
//! [`plan`] is the pure part: given the previously activated manifest, the new
//! one and the keys currently cached, decide what to evict. [`reconcile`]
//! applies that plan, promotes the staged core set and persists the new
//! manifest so the next upgrade can diff against it.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use shellcache_manifest::{Manifest, ResourceKey};
use shellcache_storage::{CacheStore, Partition, Response};
use std::collections::BTreeSet;
use tracing::instrument;

/// Key of the persisted manifest inside [`Partition::ManifestRecord`].
pub const MANIFEST_RECORD_KEY: &str = "manifest";
/// Key of the digest of the manifest whose core set is in
/// [`Partition::Staging`], inside [`Partition::ManifestRecord`].
pub const STAGED_RECORD_KEY: &str = "staged";

/// What to do with each cached entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Stale entries: removed from the manifest, or their content changed.
    pub evict: BTreeSet<ResourceKey>,
    /// Entries whose fingerprint is provably unchanged.
    pub retain: BTreeSet<ResourceKey>,
}

/// Summary of one activation's reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// No previous manifest was recorded; `content` was rebuilt from scratch.
    pub first_install: bool,
    pub evicted: usize,
    pub retained: usize,
    /// Entries copied from `staging` into `content`.
    pub promoted: usize,
}

/// Decides which cached entries survive an upgrade from `old` to `new`.
///
/// A key is kept only when both manifests list it with the same fingerprint.
/// Keys the old manifest never listed have no provable fingerprint, so they
/// go too. Without an old manifest everything goes.
///
/// ```
/// use shellcache_manifest::{Manifest, ResourceKey};
/// use shellcache_worker::plan;
///
/// let old = Manifest::new([("a", "h1"), ("b", "h2")], ["a"]).unwrap();
/// let new = Manifest::new([("a", "h1"), ("b", "h9"), ("c", "h3")], ["a"]).unwrap();
/// let cached = [ResourceKey::new("a"), ResourceKey::new("b")];
/// let plan = plan(Some(&old), &new, &cached);
/// assert!(plan.retain.contains(&ResourceKey::new("a")));
/// assert!(plan.evict.contains(&ResourceKey::new("b")));
/// ```
pub fn plan<'a>(old: Option<&Manifest>, new: &Manifest, cached: impl IntoIterator<Item = &'a ResourceKey>) -> Plan {
    let mut plan = Plan::default();
    for key in cached {
        // Re-applying the root-alias rule keeps this correct for keys that
        // reach us from anywhere other than a `ResourceKey` constructor.
        let key = ResourceKey::new(key);
        let unchanged = match (old.and_then(|old| old.fingerprint(&key)), new.fingerprint(&key)) {
            (Some(before), Some(after)) => before == after,
            _ => false,
        };
        match unchanged {
            true => plan.retain.insert(key),
            false => plan.evict.insert(key),
        };
    }
    plan
}

/// Reads the previously activated manifest, if any.
pub async fn recorded_manifest(store: &dyn CacheStore) -> Result<Option<Manifest>> {
    let record = store
        .get(Partition::ManifestRecord, &ResourceKey::new(MANIFEST_RECORD_KEY))
        .await
        .or_raise(|| ErrorKind::Storage)?;
    record.map(|response| Manifest::from_json(&response.body).or_raise(|| ErrorKind::Manifest)).transpose()
}

/// Digest of the manifest that filled `staging`, if a complete install is
/// staged.
pub async fn staged_digest(store: &dyn CacheStore) -> Result<Option<String>> {
    let record = store
        .get(Partition::ManifestRecord, &ResourceKey::new(STAGED_RECORD_KEY))
        .await
        .or_raise(|| ErrorKind::Storage)?;
    Ok(record.map(|response| String::from_utf8_lossy(&response.body).into_owned()))
}

/// Records `manifest` as the owner of everything in `staging`. Written only
/// once the whole core set is staged.
pub(crate) async fn mark_staged(store: &dyn CacheStore, manifest: &Manifest) -> Result<()> {
    let record = Response::ok(manifest.digest()).with_header("content-type", "text/plain");
    store
        .put(Partition::ManifestRecord, &ResourceKey::new(STAGED_RECORD_KEY), &record)
        .await
        .or_raise(|| ErrorKind::Storage)
}

pub(crate) async fn clear_staged(store: &dyn CacheStore) -> Result<()> {
    store
        .delete(Partition::ManifestRecord, &ResourceKey::new(STAGED_RECORD_KEY))
        .await
        .or_raise(|| ErrorKind::Storage)?;
    Ok(())
}

async fn persist_manifest(store: &dyn CacheStore, manifest: &Manifest) -> Result<()> {
    let json = manifest.to_json().or_raise(|| ErrorKind::Manifest)?;
    let record = Response::ok(json).with_header("content-type", "application/json");
    store
        .put(Partition::ManifestRecord, &ResourceKey::new(MANIFEST_RECORD_KEY), &record)
        .await
        .or_raise(|| ErrorKind::Storage)
}

/// Copies every staged entry into `content`, overwriting, then clears
/// `staging`. Returns the number of entries promoted.
async fn promote(store: &dyn CacheStore) -> Result<usize> {
    let staged = store.keys(Partition::Staging).await.or_raise(|| ErrorKind::Storage)?;
    let mut promoted = 0;
    for key in &staged {
        let Some(response) = store.get(Partition::Staging, key).await.or_raise(|| ErrorKind::Storage)? else {
            continue;
        };
        store.put(Partition::Content, key, &response).await.or_raise(|| ErrorKind::Storage)?;
        promoted += 1;
    }
    store.delete_partition(Partition::Staging).await.or_raise(|| ErrorKind::Storage)?;
    clear_staged(store).await?;
    Ok(promoted)
}

/// Brings `content` in line with `manifest` and records it as active.
///
/// 1. With no recorded manifest, `content` is dropped entirely.
/// 2. Otherwise stale entries (see [`plan`]) are deleted one by one.
/// 3. `staging` is promoted into `content` (the freshly fetched core set
///    always wins) and cleared.
/// 4. `manifest` replaces the recorded manifest.
///
/// Running it twice against the same store leaves the same `content`.
#[instrument(skip_all, fields(store = store.name(), digest = %manifest.digest()))]
pub async fn reconcile(store: &dyn CacheStore, manifest: &Manifest) -> Result<Reconciliation> {
    let old = recorded_manifest(store).await?;
    let mut report = Reconciliation::default();

    match &old {
        None => {
            tracing::info!("No manifest recorded; rebuilding content from scratch");
            report.first_install = true;
            store.delete_partition(Partition::Content).await.or_raise(|| ErrorKind::Storage)?;
        },
        Some(old) => {
            let cached = store.keys(Partition::Content).await.or_raise(|| ErrorKind::Storage)?;
            let plan = plan(Some(old), manifest, &cached);
            for key in &plan.evict {
                tracing::debug!(%key, "Evicting stale entry");
                store.delete(Partition::Content, key).await.or_raise(|| ErrorKind::Storage)?;
            }
            report.evicted = plan.evict.len();
            report.retained = plan.retain.len();
        },
    }

    report.promoted = promote(store).await?;
    persist_manifest(store, manifest).await?;
    tracing::info!(
        first_install = report.first_install,
        evicted = report.evicted,
        retained = report.retained,
        promoted = report.promoted,
        "Reconciled content"
    );
    Ok(report)
}
