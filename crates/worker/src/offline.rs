//! Offline completion: caching everything the manifest lists.

use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::fetch::{FetchRequest, fetch_success};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use shellcache_manifest::{Manifest, ResourceKey};
use shellcache_storage::{Partition, Response};
use std::collections::BTreeSet;
use tracing::instrument;

/// Outcome of one offline completion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineReport {
    /// Keys fetched and stored by this run.
    pub fetched: BTreeSet<ResourceKey>,
    /// Keys that could not be fetched (transport error or non-2xx).
    pub failed: BTreeSet<ResourceKey>,
}
impl OfflineReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Manifest keys with no entry in `content`.
pub async fn missing(ctx: &Context, manifest: &Manifest) -> Result<BTreeSet<ResourceKey>> {
    let cached = ctx.store.keys(Partition::Content).await.or_raise(|| ErrorKind::Storage)?;
    Ok(manifest.keys().filter(|key| !cached.contains(*key)).cloned().collect())
}

async fn fetch_one(ctx: &Context, key: ResourceKey) -> (ResourceKey, Result<Response>) {
    let response: Result<Response> = async {
        let url = ctx.scope.url_for(&key).or_raise(|| ErrorKind::Fetch(key.clone()))?;
        fetch_success(ctx.fetcher.as_ref(), &FetchRequest::get(url)).await.or_raise(|| ErrorKind::Fetch(key.clone()))
    }
    .await;
    (key, response)
}

/// Fetches and stores every manifest entry missing from `content`.
///
/// Up to `ctx.offline_concurrency` fetches are in flight at once, and each
/// response is stored as soon as it arrives. Failed fetches are reported, not
/// retried. Running it again right away fetches nothing. Neither `staging`
/// nor the manifest record is touched.
///
/// Only a failure to list or write `content` aborts the run.
#[instrument(skip_all, fields(store = ctx.store.name(), concurrency = ctx.offline_concurrency))]
pub async fn download_offline(ctx: &Context, manifest: &Manifest) -> Result<OfflineReport> {
    let mut pending: Vec<_> = missing(ctx, manifest).await?.into_iter().collect();
    tracing::info!(missing = pending.len(), "Completing offline cache");
    let mut report = OfflineReport::default();

    let initial = pending.len().saturating_sub(ctx.offline_concurrency.max(1));
    let mut in_flight: FuturesUnordered<_> = pending.drain(initial..).map(|key| fetch_one(ctx, key)).collect();
    while let Some((key, result)) = in_flight.next().await {
        match result {
            Ok(response) => {
                ctx.store.put(Partition::Content, &key, &response).await.or_raise(|| ErrorKind::Storage)?;
                report.fetched.insert(key);
            },
            Err(e) => {
                tracing::warn!(%key, error = ?e, "Could not fetch resource for offline use");
                report.failed.insert(key);
            },
        }
        if let Some(key) = pending.pop() {
            in_flight.push(fetch_one(ctx, key));
        }
    }

    tracing::info!(fetched = report.fetched.len(), failed = report.failed.len(), "Offline cache completion finished");
    Ok(report)
}
