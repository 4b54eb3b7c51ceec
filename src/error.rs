//! CLI Error Types

use derive_more::{Display, Error};
use shellcache_worker::LifecycleState;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not read manifest")]
    Manifest,
    #[display("could not open cache store")]
    Store,
    #[display("worker error")]
    Worker,
    /// The configured manifest is not the one serving requests.
    #[display("configured manifest is not active (state: {_0})")]
    NotActive(#[error(not(source))] LifecycleState),
    #[display("invalid request URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Some manifest entries could not be cached.
    #[display("{_0} resource(s) could not be cached for offline use")]
    OfflineIncomplete(#[error(not(source))] usize),
    #[display("could not write response body")]
    Output,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OfflineIncomplete(_))
    }
}
