//! The cache worker.
//!
//! A [`Lifecycle`] stages a new [`Manifest`](shellcache_manifest::Manifest)'s
//! core resources, then reconciles the durable cache against it on
//! activation. Once active it hands out an [`Interceptor`] that serves
//! requests from cache with network-refresh semantics, and on request fills
//! in everything the manifest lists that is not cached yet (see
//! [`download_offline`]).

pub mod error;
pub mod fetch;
mod intercept;
mod lifecycle;
mod offline;
mod reconcile;
#[cfg(test)]
mod testing;

pub use crate::intercept::{Interception, Interceptor, Request, Source};
pub use crate::lifecycle::{ClientEvent, Command, Lifecycle, LifecycleState, Outcome, purge};
pub use crate::offline::{OfflineReport, download_offline, missing};
pub use crate::reconcile::{
    MANIFEST_RECORD_KEY, Plan, Reconciliation, STAGED_RECORD_KEY, plan, reconcile, recorded_manifest, staged_digest,
};
use shellcache_manifest::Scope;
use shellcache_storage::StoreHandle;

/// Number of manifest entries fetched at once by the offline task unless
/// configured otherwise.
pub const DEFAULT_OFFLINE_CONCURRENCY: usize = 16;

/// Collaborators shared by every part of the worker.
#[derive(Clone)]
pub struct Context {
    pub store: StoreHandle,
    pub fetcher: fetch::FetcherHandle,
    pub scope: Scope,
    pub offline_concurrency: usize,
}
impl Context {
    pub fn new(store: StoreHandle, fetcher: fetch::FetcherHandle, scope: Scope) -> Self {
        Self {
            store,
            fetcher,
            scope,
            offline_concurrency: DEFAULT_OFFLINE_CONCURRENCY,
        }
    }

    pub fn with_offline_concurrency(mut self, concurrency: usize) -> Self {
        self.offline_concurrency = concurrency.max(1);
        self
    }
}
