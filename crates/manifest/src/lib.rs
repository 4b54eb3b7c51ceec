//! Resource manifests for a versioned application shell.
//!
//! A [`Manifest`] is produced by the build and never mutated afterwards: it
//! maps every logical resource path ([`ResourceKey`]) to an opaque content
//! [`Fingerprint`], and names the small set of "core" resources that must be
//! cached before the shell is usable.
//!
//! [`Scope`] turns request URLs into resource keys (and back), applying the
//! cache-busting and root-alias rules shared by the interceptor and the
//! reconciler.

pub mod error;
mod key;
mod manifest;

pub use crate::key::{ResourceKey, Scope, VERSION_PARAM};
pub use crate::manifest::{Fingerprint, MAX_CORE_ENTRIES, Manifest};
