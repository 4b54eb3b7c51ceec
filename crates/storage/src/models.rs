//! Storage models.
//!
//! [`Response`] is both what the network hands back and what a partition
//! stores; keeping them the same type means a fill is a plain `put` of the
//! fetched value.

use derive_more::Display;
use std::collections::BTreeMap;
use time::UtcDateTime;

/// A named, independent storage partition.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    /// Serves intercepted requests.
    #[display("content")]
    Content,
    /// Core resources fetched during install, waiting for activation.
    #[display("staging")]
    Staging,
    /// The previously activated manifest, for diffing on the next upgrade.
    #[display("manifest")]
    ManifestRecord,
}
impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Content, Partition::Staging, Partition::ManifestRecord];

    /// Stable name, also used as the on-disk directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Staging => "staging",
            Self::ManifestRecord => "manifest",
        }
    }
}

/// Response bytes plus the metadata needed to replay them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Header names are lowercased on insert
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// When the response came off the network
    pub received_at: UtcDateTime,
}
impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            received_at: UtcDateTime::now(),
        }
    }

    /// A `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_received_at(mut self, received_at: UtcDateTime) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// `true` for 2xx statuses; only these are ever written to a partition.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
