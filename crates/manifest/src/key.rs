//! Request keys and URL normalization.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use url::Url;

/// Query parameter appended by the shell's loader to bust HTTP caches. It
/// never takes part in the key.
pub const VERSION_PARAM: &str = "v";

/// A normalized resource key.
///
/// Either the reserved root alias `/` or a path relative to the [`Scope`]
/// (no leading slash), optionally followed by a residual query string.
/// Construction always applies the root-alias rule, so two keys that refer to
/// the same resource compare equal.
///
/// ```
/// use shellcache_manifest::ResourceKey;
///
/// assert!(ResourceKey::new("").is_root());
/// assert!(ResourceKey::new("/").is_root());
/// assert_eq!(ResourceKey::new("/main.dart.js").as_str(), "main.dart.js");
/// ```
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Reserved alias of the application's root document.
    pub const ROOT: &'static str = "/";

    pub fn new(key: impl AsRef<str>) -> Self {
        let trimmed = key.as_ref().trim_start_matches('/');
        match trimmed.is_empty() {
            true => Self::root(),
            false => Self(trimmed.to_string()),
        }
    }

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.0
    }
}
impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The URL subtree governed by the cache.
///
/// Usually the application's origin (`https://app.example/`), but a shell
/// deployed beneath a path (`https://host/app/`) works the same way. The base
/// path always ends in a slash; query and fragment are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    base: Url,
}

impl Scope {
    pub fn new(mut base: Url) -> Result<Self> {
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            exn::bail!(ErrorKind::InvalidScope(base.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn parse(base: &str) -> Result<Self> {
        let url = Url::parse(base).or_raise(|| ErrorKind::InvalidScope(base.to_string()))?;
        Self::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.base
    }

    /// Normalizes a request URL into a resource key.
    ///
    /// Returns `None` for URLs outside the scope; those are never candidates
    /// for caching. Inside the scope:
    /// 1. the cache-busting [`VERSION_PARAM`] is stripped (other query pairs
    ///    are kept byte for byte, in order),
    /// 2. fragments are ignored,
    /// 3. the scope itself (with or without trailing slash or fragment)
    ///    becomes the root alias `/`.
    ///
    /// ```
    /// use shellcache_manifest::Scope;
    /// use url::Url;
    ///
    /// let scope = Scope::parse("https://app.example/").unwrap();
    /// let key = |u: &str| scope.key_for(&Url::parse(u).unwrap()).map(|k| k.to_string());
    /// assert_eq!(key("https://app.example/#/home").as_deref(), Some("/"));
    /// assert_eq!(key("https://app.example/main.dart.js?v=42").as_deref(), Some("main.dart.js"));
    /// assert_eq!(key("https://cdn.example/main.dart.js"), None);
    /// ```
    pub fn key_for(&self, url: &Url) -> Option<ResourceKey> {
        if url.origin() != self.base.origin() {
            return None;
        }
        let base_path = self.base.path();
        let path = url.path();
        let relative = match path.strip_prefix(base_path) {
            Some(rest) => rest,
            None if path == base_path.trim_end_matches('/') => "",
            None => return None,
        };

        // Drop the version pairs, leaving every other pair exactly as sent.
        let residual: Vec<&str> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some(VERSION_PARAM))
            .collect();
        if residual.is_empty() {
            return Some(ResourceKey::new(relative));
        }
        Some(ResourceKey::new(format!("{relative}?{}", residual.join("&"))))
    }

    /// Resolves a resource key to the absolute URL it is fetched from.
    pub fn url_for(&self, key: &ResourceKey) -> Result<Url> {
        if key.is_root() {
            return Ok(self.base.clone());
        }
        // The "./" prefix stops keys such as "c:thing" parsing as a scheme.
        let url = self
            .base
            .join(&format!("./{}", key.as_str()))
            .or_raise(|| ErrorKind::InvalidKey(key.to_string()))?;
        if url.origin() != self.base.origin() || !url.path().starts_with(self.base.path()) {
            exn::bail!(ErrorKind::InvalidKey(key.to_string()));
        }
        Ok(url)
    }
}
