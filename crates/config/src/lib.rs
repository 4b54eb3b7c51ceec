//! Layered configuration.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults,
//! 2. `shellcache.toml` in the platform configuration directory,
//! 3. `shellcache.toml` in the working directory,
//! 4. an explicitly named file (TOML, YAML or JSON, by extension),
//! 5. `SHELLCACHE_*` environment variables.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
pub use shellcache_worker::DEFAULT_OFFLINE_CONCURRENCY;
use std::path::{Path, PathBuf};
use url::Url;

pub const FILE_NAME: &str = "shellcache.toml";
pub const ENV_PREFIX: &str = "SHELLCACHE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL whose subtree is cached.
    pub scope: Url,
    /// Path to the manifest of the version to install.
    pub manifest: PathBuf,
    /// Build output directory served as the origin.
    #[serde(default)]
    pub origin_dir: Option<PathBuf>,
    /// Where the durable cache lives.
    pub store_dir: PathBuf,
    /// Activate as soon as install completes.
    pub skip_waiting: bool,
    /// Simultaneous fetches during offline completion.
    pub offline_concurrency: usize,
}

/// Values used when no source sets them.
#[derive(Serialize)]
struct Defaults {
    store_dir: PathBuf,
    skip_waiting: bool,
    offline_concurrency: usize,
}
impl Default for Defaults {
    fn default() -> Self {
        let store_dir = project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".shellcache"));
        Self {
            store_dir,
            skip_waiting: true,
            offline_concurrency: DEFAULT_OFFLINE_CONCURRENCY,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shellcache")
}

impl Config {
    /// Only the built-in defaults.
    pub fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Defaults::default()))
    }

    /// Every source, in priority order. `explicit` must exist if given.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Self::defaults();
        if let Some(dirs) = project_dirs() {
            figment = figment.merge(Toml::file(dirs.config_dir().join(FILE_NAME)));
        }
        figment = figment.merge(Toml::file(FILE_NAME));
        if let Some(path) = explicit {
            figment = Self::merge_file(figment, path)?;
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Merges a file, picking the format from its extension (TOML unless it
    /// says `yaml`, `yml` or `json`).
    pub fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        })
    }

    /// Loads from every source and validates.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(explicit)?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(scope = %config.scope, store_dir = %config.store_dir.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.scope.scheme(), "http" | "https") || self.scope.cannot_be_a_base() {
            exn::bail!(ErrorKind::Invalid(format!("scope must be an http(s) URL, got `{}`", self.scope)));
        }
        if self.manifest.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("manifest path is empty".to_string()));
        }
        if self.store_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("store_dir is empty".to_string()));
        }
        if self.offline_concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("offline_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}
