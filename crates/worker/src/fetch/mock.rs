//! Scriptable fetcher for testing.

use super::error::{ErrorKind, Result};
use super::{FetchRequest, Fetcher};
use async_trait::async_trait;
use shellcache_storage::Response;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

enum Route {
    Respond(Response),
    Fail,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    offline: bool,
    requests: Vec<FetchRequest>,
}

/// In-memory origin for testing.
///
/// URLs are matched exactly (after URL normalization). Unknown URLs answer
/// `404 Not Found`; URLs registered with [`fail()`](Self::fail), and every URL
/// while [`set_offline(true)`](Self::set_offline) is in effect, fail with a
/// network error. Every request is recorded so tests can assert on what was
/// fetched and how.
///
/// Only compiled for this crate's own tests, or for other crates enabling the
/// `mock` feature.
#[derive(Default)]
pub struct MockFetcher {
    state: Mutex<State>,
}

impl MockFetcher {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn normalize(url: &str) -> String {
        Url::parse(url).map(String::from).unwrap_or_else(|_| url.to_string())
    }

    /// Answer `url` with `response` from now on.
    pub fn serve(&self, url: impl AsRef<str>, response: Response) -> &Self {
        self.state().routes.insert(Self::normalize(url.as_ref()), Route::Respond(response));
        self
    }

    /// Fail every request for `url` with a network error.
    pub fn fail(&self, url: impl AsRef<str>) -> &Self {
        self.state().routes.insert(Self::normalize(url.as_ref()), Route::Fail);
        self
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) -> &Self {
        self.state().offline = offline;
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.state().requests.clone()
    }

    /// Number of requests received for `url`.
    pub fn request_count(&self, url: impl AsRef<str>) -> usize {
        let url = Self::normalize(url.as_ref());
        self.state().requests.iter().filter(|request| request.url.as_str() == url).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
        let mut state = self.state();
        state.requests.push(request.clone());
        if state.offline {
            exn::bail!(ErrorKind::Network("offline".to_string()));
        }
        match state.routes.get(request.url.as_str()) {
            Some(Route::Respond(response)) => Ok(response.clone()),
            Some(Route::Fail) => exn::bail!(ErrorKind::Network(format!("connection reset: {}", request.url))),
            None => Ok(Response::new(404, Vec::new())),
        }
    }
}
