//! Worker Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Lower layers (store, fetcher, manifest) are raised into
//! these kinds so callers can tell a failed install from a failed activation
//! without walking the tree.

use crate::lifecycle::{Command, LifecycleState};
use derive_more::{Display, Error};
use shellcache_manifest::ResourceKey;

/// A worker error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies worker failures.
///
/// ### Fatal
/// - [`ErrorKind::Install`]: a core resource could not be staged; this
///   version never reaches `Waiting`.
/// - [`ErrorKind::Activation`]: reconciliation failed; every partition has
///   been purged.
/// - [`ErrorKind::Purge`]: clearing the store failed, state is unknown.
///
/// ### Operational
/// - [`ErrorKind::InvalidTransition`]
/// - [`ErrorKind::Fetch`]
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Manifest`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("install failed")]
    Install,
    #[display("activation failed, cache purged")]
    Activation,
    #[display("could not purge cache")]
    Purge,
    #[display("cannot {command} while {state}")]
    InvalidTransition { command: Command, state: LifecycleState },
    /// Network request for a resource failed or returned a non-2xx status.
    #[display("could not fetch {_0}")]
    Fetch(#[error(not(source))] ResourceKey),
    #[display("cache store operation failed")]
    Storage,
    /// The persisted manifest record could not be read or written.
    #[display("manifest record unusable")]
    Manifest,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Storage)
    }
}
