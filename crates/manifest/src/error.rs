//! Manifest Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A manifest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every variant describes build input that has to be fixed upstream; none of
/// them go away by trying again.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Manifest could not be parsed or serialized.
    #[display("invalid manifest data")]
    InvalidJson,
    /// Manifest file could not be read.
    #[display("could not read manifest: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// A core entry does not name a resource in the manifest.
    #[display("core entry is not a manifest resource: {_0}")]
    UnknownCoreKey(#[error(not(source))] String),
    /// The same core entry was listed twice.
    #[display("duplicate core entry: {_0}")]
    DuplicateCoreKey(#[error(not(source))] String),
    /// More core entries than the shell is allowed to block on.
    #[display("core set has {_0} entries, at most 10 are allowed")]
    CoreSetTooLarge(#[error(not(source))] usize),
    /// Scope URL cannot act as a base for resource URLs.
    #[display("invalid scope: {_0}")]
    InvalidScope(#[error(not(source))] String),
    /// Resource key cannot be turned into a URL beneath the scope.
    #[display("invalid resource key: {_0}")]
    InvalidKey(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
