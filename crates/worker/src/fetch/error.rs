//! Fetch Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Transport-level failure: nothing came back.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The origin cannot serve this URL at all.
    #[display("invalid url: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// The origin answered, but not with a 2xx.
    #[display("unexpected status {_0}")]
    Status(#[error(not(source))] u16),
    #[display("could not read {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Status(status) => *status >= 500,
            Self::InvalidUrl(_) => false,
        }
    }
}
