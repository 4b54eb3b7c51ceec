//! Network collaborator.
//!
//! Everything the worker needs from "the network" is one call: turn a
//! [`FetchRequest`] into a [`Response`]. A [`Fetcher`] returns whatever the
//! origin answered, whatever the status; only transport failures are errors.
//! Callers that need a 2xx use [`fetch_success`].

mod directory;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::directory::DirectoryFetcher;
use self::error::{ErrorKind, Result};
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockFetcher;
use async_trait::async_trait;
use derive_more::Display;
use shellcache_storage::Response;
use std::sync::Arc;
use url::Url;

pub type FetcherHandle = Arc<dyn Fetcher + Send + Sync>;

/// Request method. Only [`Method::Get`] is ever intercepted.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    #[display("GET")]
    Get,
    #[display("HEAD")]
    Head,
    #[display("POST")]
    Post,
    #[display("PUT")]
    Put,
    #[display("PATCH")]
    Patch,
    #[display("DELETE")]
    Delete,
    #[display("OPTIONS")]
    Options,
}

/// How the fetch may use intermediate HTTP caches.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching rules.
    #[default]
    #[display("default")]
    Default,
    /// Bypass HTTP caches and revalidate with the origin.
    #[display("reload")]
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub mode: CacheMode,
}
impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            mode: CacheMode::Default,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Name of the fetcher, for logging only.
    fn name(&self) -> &str;

    /// Perform a request. Non-2xx responses are `Ok`.
    async fn fetch(&self, request: &FetchRequest) -> Result<Response>;
}

/// Fetch and insist on a 2xx response.
pub async fn fetch_success(fetcher: &dyn Fetcher, request: &FetchRequest) -> Result<Response> {
    let response = fetcher.fetch(request).await?;
    if !response.is_success() {
        exn::bail!(ErrorKind::Status(response.status));
    }
    Ok(response)
}
