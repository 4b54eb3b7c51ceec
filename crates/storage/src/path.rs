//! Mapping resource keys onto relative filesystem paths.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a resource key for use as a path beneath some root directory.
///
/// Keys are `/`-separated relative paths. The returned path never escapes the
/// root: `..` may only cancel a preceding component. Keys carrying a query
/// string, null bytes, Windows prefixes, or nothing at all once normalized
/// are rejected with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shellcache_storage::validate_path;
///
/// assert_eq!(validate_path("assets/fonts/icons.otf").unwrap(), Path::new("assets/fonts/icons.otf"));
/// assert_eq!(validate_path("a/../main.dart.js").unwrap(), Path::new("main.dart.js"));
/// assert!(validate_path("../secrets.txt").is_err());
/// assert!(validate_path("data.json?page=2").is_err());
/// assert!(validate_path("/").is_err());
/// ```
pub fn validate(key: impl AsRef<str>) -> Result<PathBuf> {
    let key = key.as_ref();
    let invalid = || ErrorKind::InvalidPath(PathBuf::from(key));
    if key.contains('?') || key.contains('\0') {
        exn::bail!(invalid());
    }
    let mut components = Vec::new();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(segment) => components.push(segment),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}
