//! Serving requests from the active version's cache.

use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::fetch::{FetchRequest, Method};
use derive_more::Display;
use exn::ResultExt;
use shellcache_manifest::{Manifest, ResourceKey};
use shellcache_storage::{Partition, Response};
use std::sync::Arc;
use url::Url;

/// An incoming client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
}
impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }
}

/// Where a served response came from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    #[display("network")]
    Network,
    #[display("cache")]
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Not ours to serve; the request goes to the network untouched.
    Bypass,
    Respond { response: Response, source: Source },
}

/// Request interceptor bound to one active manifest.
///
/// Only `GET` requests for keys the manifest lists are handled:
/// - the root alias is served **online-first**: a fresh network response is
///   stored and returned, the cached copy only answers when the network is
///   unreachable;
/// - everything else is **cache-first**: a cached entry answers immediately,
///   a miss is fetched and stored if (and only if) it came back 2xx.
///
/// Cheap to clone; clones share the store and fetcher.
#[derive(Clone)]
pub struct Interceptor {
    ctx: Context,
    manifest: Arc<Manifest>,
}

/// The URL as the network sees it: fragments never leave the client.
fn network_url(request: &Request) -> Url {
    let mut url = request.url.clone();
    url.set_fragment(None);
    url
}

impl Interceptor {
    pub fn new(ctx: Context, manifest: Arc<Manifest>) -> Self {
        Self { ctx, manifest }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The cache key governing `request`, or `None` when it is not
    /// intercepted.
    pub fn key_for(&self, request: &Request) -> Option<ResourceKey> {
        if request.method != Method::Get {
            return None;
        }
        self.ctx.scope.key_for(&request.url).filter(|key| self.manifest.contains(key))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: &Request) -> Result<Interception> {
        let Some(key) = self.key_for(request) else {
            tracing::trace!("Bypassing");
            return Ok(Interception::Bypass);
        };
        match key.is_root() {
            true => self.online_first(&key, request).await,
            false => self.cache_first(&key, request).await,
        }
    }

    async fn online_first(&self, key: &ResourceKey, request: &Request) -> Result<Interception> {
        let fetched = self.ctx.fetcher.fetch(&FetchRequest::get(network_url(request))).await;
        match fetched {
            Ok(response) => {
                self.fill(key, &response).await;
                Ok(Interception::Respond { response, source: Source::Network })
            },
            Err(fetch_error) => {
                tracing::debug!(%key, error = ?fetch_error, "Network unreachable, falling back to cache");
                match self.cached(key).await {
                    Some(response) => Ok(Interception::Respond { response, source: Source::Cache }),
                    None => Err(fetch_error).or_raise(|| ErrorKind::Fetch(key.clone())),
                }
            },
        }
    }

    async fn cache_first(&self, key: &ResourceKey, request: &Request) -> Result<Interception> {
        if let Some(response) = self.cached(key).await {
            return Ok(Interception::Respond { response, source: Source::Cache });
        }
        let response = self
            .ctx
            .fetcher
            .fetch(&FetchRequest::get(network_url(request)))
            .await
            .or_raise(|| ErrorKind::Fetch(key.clone()))?;
        self.fill(key, &response).await;
        Ok(Interception::Respond { response, source: Source::Network })
    }

    /// Cached entry for `key`. A store that can't be read counts as a miss.
    async fn cached(&self, key: &ResourceKey) -> Option<Response> {
        match self.ctx.store.get(Partition::Content, key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(%key, error = ?e, "Could not read cached entry");
                None
            },
        }
    }

    /// Stores a 2xx response under `key`. Failing to store never hides a
    /// good response from the caller.
    async fn fill(&self, key: &ResourceKey, response: &Response) {
        if !response.is_success() {
            tracing::debug!(%key, status = response.status, "Not caching unsuccessful response");
            return;
        }
        if let Err(e) = self.ctx.store.put(Partition::Content, key, response).await {
            tracing::warn!(%key, error = ?e, "Could not cache response");
        }
    }
}
