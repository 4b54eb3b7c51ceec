use crate::ResourceKey;
use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Upper bound on the core set; install blocks on every one of them.
pub const MAX_CORE_ENTRIES: usize = 10;

/// Opaque content hash, only ever compared for equality.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}
impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// On-disk/wire representation. Accepts the key spellings emitted by older
/// build pipelines.
#[derive(Serialize, Deserialize)]
struct ManifestFile {
    #[serde(alias = "files", alias = "RESOURCES")]
    resources: BTreeMap<ResourceKey, Fingerprint>,
    #[serde(default, alias = "CORE")]
    core: Vec<ResourceKey>,
}

#[derive(Serialize)]
struct ManifestFileRef<'a> {
    resources: &'a BTreeMap<ResourceKey, Fingerprint>,
    core: &'a [ResourceKey],
}

/// The resources of one deployed version.
///
/// Immutable once constructed: a new deployment produces a new `Manifest`.
/// Keys are kept sorted so serialization (and therefore the
/// [`digest`](Self::digest)) is deterministic.
///
/// ```
/// use shellcache_manifest::Manifest;
///
/// let manifest = Manifest::new([("a", "h1"), ("b", "h2")], ["a"]).unwrap();
/// assert_eq!(manifest.fingerprint(&"a".into()).map(|f| f.as_str()), Some("h1"));
/// assert!(Manifest::new([("a", "h1")], ["missing"]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    resources: BTreeMap<ResourceKey, Fingerprint>,
    core: Vec<ResourceKey>,
}

impl Manifest {
    /// Builds a manifest, validating the core set against the resources.
    pub fn new(
        resources: impl IntoIterator<Item = (impl Into<ResourceKey>, impl Into<Fingerprint>)>,
        core: impl IntoIterator<Item = impl Into<ResourceKey>>,
    ) -> Result<Self> {
        let resources = resources.into_iter().map(|(key, hash)| (key.into(), hash.into())).collect();
        Self::validated(resources, core.into_iter().map(Into::into).collect())
    }

    fn validated(resources: BTreeMap<ResourceKey, Fingerprint>, core: Vec<ResourceKey>) -> Result<Self> {
        if core.len() > MAX_CORE_ENTRIES {
            exn::bail!(ErrorKind::CoreSetTooLarge(core.len()));
        }
        let mut seen = BTreeSet::new();
        for key in &core {
            if !resources.contains_key(key) {
                exn::bail!(ErrorKind::UnknownCoreKey(key.to_string()));
            }
            if !seen.insert(key) {
                exn::bail!(ErrorKind::DuplicateCoreKey(key.to_string()));
            }
        }
        Ok(Self { resources, core })
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let file: ManifestFile = serde_json::from_slice(data).or_raise(|| ErrorKind::InvalidJson)?;
        Self::validated(file.resources, file.core)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        let manifest = Self::from_json(&data)?;
        tracing::debug!(path = %path.display(), resources = manifest.len(), "Loaded manifest");
        Ok(manifest)
    }

    /// Canonical JSON form, used for the persisted record and the digest.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let file = ManifestFileRef { resources: &self.resources, core: &self.core };
        serde_json::to_vec(&file).or_raise(|| ErrorKind::InvalidJson)
    }

    /// BLAKE3 hex digest over the sorted entries and the core set; identifies
    /// this version.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (key, fingerprint) in &self.resources {
            hasher.update(key.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(fingerprint.as_str().as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&[0xff]);
        for key in &self.core {
            hasher.update(key.as_str().as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn fingerprint(&self, key: &ResourceKey) -> Option<&Fingerprint> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    pub fn core(&self) -> &[ResourceKey] {
        &self.core
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &Fingerprint)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> Manifest {
        Manifest::new(
            [("/", "h0"), ("index.html", "h0"), ("main.dart.js", "h1"), ("assets/FontManifest.json", "h2")],
            ["main.dart.js", "index.html"],
        )
        .unwrap()
    }

    #[test]
    fn test_core_must_be_resources() {
        let err = Manifest::new([("a", "h1")], ["b"]).unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownCoreKey("b".into()));
    }

    #[test]
    fn test_core_rejects_duplicates() {
        let err = Manifest::new([("a", "h1")], ["a", "/a"]).unwrap_err();
        assert_eq!(*err, ErrorKind::DuplicateCoreKey("a".into()));
    }

    #[test]
    fn test_core_size_limit() {
        let resources: Vec<_> = (0..12).map(|i| (format!("file{i}.js"), format!("h{i}"))).collect();
        let core: Vec<_> = resources.iter().map(|(k, _)| k.clone()).collect();
        let err = Manifest::new(resources.clone(), core).unwrap_err();
        assert_eq!(*err, ErrorKind::CoreSetTooLarge(12));
        let within: Vec<_> = resources.iter().take(MAX_CORE_ENTRIES).map(|(k, _)| k.clone()).collect();
        assert!(Manifest::new(resources, within).is_ok());
    }

    #[test]
    fn test_root_alias_in_resources() {
        let manifest = Manifest::new([("", "h0")], Vec::<String>::new()).unwrap();
        assert!(manifest.contains(&ResourceKey::root()));
    }

    #[test]
    fn test_json_round_trip_keeps_core_order() {
        let manifest = sample();
        let parsed = Manifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.core(), &[ResourceKey::new("main.dart.js"), ResourceKey::new("index.html")]);
    }

    #[test]
    fn test_from_json_accepts_build_aliases() {
        let json = br#"{"RESOURCES": {"/": "x", "index.html": "x"}, "CORE": ["index.html"]}"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.core(), &[ResourceKey::new("index.html")]);
    }

    #[test]
    fn test_from_json_without_core() {
        let manifest = Manifest::from_json(br#"{"resources": {"a.js": "1"}}"#).unwrap();
        assert!(manifest.core().is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = Manifest::from_json(b"[1, 2, 3]").unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidJson);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&sample().to_json().unwrap()).unwrap();
        assert_eq!(Manifest::from_path(file.path()).unwrap(), sample());
        let err = Manifest::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = Manifest::new([("a", "h1"), ("b", "h2")], ["a"]).unwrap();
        let same = Manifest::new([("b", "h2"), ("a", "h1")], ["a"]).unwrap();
        let changed = Manifest::new([("a", "h1"), ("b", "h9")], ["a"]).unwrap();
        assert_eq!(a.digest(), same.digest());
        assert_ne!(a.digest(), changed.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
