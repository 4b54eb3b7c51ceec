//! Durable, partitioned response storage.
//!
//! The cache keeps three independent partitions (see [`Partition`]): the
//! `content` partition that serves requests, a `staging` partition filled
//! during install, and a `manifest` partition holding the previously active
//! manifest. Every backend implements [`CacheStore`]; callers hold a
//! [`StoreHandle`] and never care which one they got.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::CacheStore;
pub use crate::models::{Partition, Response};
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn CacheStore + Send + Sync>;
