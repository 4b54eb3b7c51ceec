//! Origin backed by a build output directory.

use super::error::{ErrorKind, Result};
use super::{FetchRequest, Fetcher, Method};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use shellcache_manifest::Scope;
use shellcache_storage::{Response, validate_path};
use std::path::{Path, PathBuf};
use tokio::fs;

const INDEX_FILE: &str = "index.html";

/// Serves the files of a build output directory as if they were deployed at
/// `scope`.
///
/// The root alias maps to `index.html`, residual query strings are ignored,
/// and anything that isn't a regular file answers `404`. Only `GET` and
/// `HEAD` are supported; other methods answer `405`.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
    scope: Scope,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>, scope: Scope) -> Self {
        Self { root: root.into(), scope }
    }

    fn content_type(path: &Path) -> &'static str {
        match path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("html" | "htm") => "text/html; charset=utf-8",
            Some("js" | "mjs") => "text/javascript; charset=utf-8",
            Some("css") => "text/css; charset=utf-8",
            Some("json" | "map") => "application/json",
            Some("wasm") => "application/wasm",
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("svg") => "image/svg+xml",
            Some("ico") => "image/x-icon",
            Some("webp") => "image/webp",
            Some("otf") => "font/otf",
            Some("ttf") => "font/ttf",
            Some("woff") => "font/woff",
            Some("woff2") => "font/woff2",
            Some("txt") => "text/plain; charset=utf-8",
            _ => "application/octet-stream",
        }
    }

    /// Relative file path for a request URL.
    fn file_for(&self, request: &FetchRequest) -> Result<PathBuf> {
        let invalid = || ErrorKind::InvalidUrl(request.url.to_string());
        let key = self.scope.key_for(&request.url).ok_or_raise(invalid)?;
        if key.is_root() {
            return Ok(PathBuf::from(INDEX_FILE));
        }
        let path = key.as_str().split_once('?').map_or(key.as_str(), |(path, _query)| path);
        validate_path(path).or_raise(invalid)
    }
}

#[async_trait]
impl Fetcher for DirectoryFetcher {
    fn name(&self) -> &str {
        "directory"
    }

    #[tracing::instrument(level = "debug", skip_all, fields(url = %request.url, method = %request.method))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
        if !matches!(request.method, Method::Get | Method::Head) {
            return Ok(Response::new(405, Vec::new()).with_header("allow", "GET, HEAD"));
        }
        let relative = self.file_for(request)?;
        let path = self.root.join(&relative);
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::IsADirectory) => {
                tracing::debug!(path = %path.display(), "not found");
                return Ok(Response::new(404, Vec::new()));
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(path)),
        };
        let length = body.len();
        let body = match request.method {
            Method::Head => Vec::new(),
            _ => body,
        };
        Ok(Response::ok(body)
            .with_header("content-type", Self::content_type(&relative))
            .with_header("content-length", length.to_string()))
    }
}
