//! Command implementations, independent of argument parsing and printing.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use shellcache_config::Config;
use shellcache_manifest::{Manifest, Scope};
use shellcache_storage::backend::LocalStore;
use shellcache_storage::{Partition, Response};
use shellcache_worker::fetch::{DirectoryFetcher, FetchRequest, Method};
use shellcache_worker::{
    Command, Context, Interception, Lifecycle, LifecycleState, OfflineReport, Outcome, Request, Source,
    recorded_manifest,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Everything a command needs, built once from configuration.
pub struct App {
    ctx: Context,
    manifest: Arc<Manifest>,
    skip_waiting: bool,
}

impl App {
    /// Opens the local store and the origin directory named by `config`.
    ///
    /// Without an explicit `origin_dir` the manifest's own directory is the
    /// origin.
    pub fn open(config: &Config) -> Result<Self> {
        let scope = Scope::new(config.scope.clone()).or_raise(|| ErrorKind::Config)?;
        let manifest = Manifest::from_path(&config.manifest).or_raise(|| ErrorKind::Manifest)?;
        let origin = match &config.origin_dir {
            Some(dir) => dir.clone(),
            None => config.manifest.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
        };
        let store_dir = std::path::absolute(&config.store_dir).or_raise(|| ErrorKind::Store)?;
        let store = LocalStore::new("local", store_dir).or_raise(|| ErrorKind::Store)?;
        let fetcher = DirectoryFetcher::new(origin, scope.clone());
        let ctx = Context::new(Arc::new(store), Arc::new(fetcher), scope)
            .with_offline_concurrency(config.offline_concurrency);
        Ok(Self::new(ctx, manifest, config.skip_waiting))
    }

    pub fn new(ctx: Context, manifest: impl Into<Arc<Manifest>>, skip_waiting: bool) -> Self {
        Self {
            ctx,
            manifest: manifest.into(),
            skip_waiting,
        }
    }

    async fn lifecycle(&self) -> Result<Lifecycle> {
        let lifecycle = Lifecycle::resume(self.ctx.clone(), self.manifest.clone())
            .await
            .or_raise(|| ErrorKind::Worker)?;
        Ok(lifecycle.with_skip_waiting(self.skip_waiting))
    }

    async fn active_lifecycle(&self) -> Result<Lifecycle> {
        let lifecycle = self.lifecycle().await?;
        if lifecycle.state() != LifecycleState::Active {
            exn::bail!(ErrorKind::NotActive(lifecycle.state()));
        }
        Ok(lifecycle)
    }

    /// Installs the configured manifest unless it is already installed.
    ///
    /// Returns [`Outcome::Ignored`] when it is already active.
    #[tracing::instrument(skip_all, fields(digest = %self.manifest.digest()))]
    pub async fn upgrade(&self) -> Result<Outcome> {
        let mut lifecycle = self.lifecycle().await?;
        let command = match lifecycle.state() {
            LifecycleState::Active => {
                tracing::info!("Manifest already active");
                return Ok(Outcome::Ignored);
            },
            LifecycleState::Waiting if !self.skip_waiting => return Ok(Outcome::Waiting),
            LifecycleState::Waiting => Command::Activate,
            _ => Command::Install,
        };
        lifecycle.handle(command).await.or_raise(|| ErrorKind::Worker)
    }

    pub async fn activate(&self) -> Result<Outcome> {
        let mut lifecycle = self.lifecycle().await?;
        lifecycle.handle(Command::Activate).await.or_raise(|| ErrorKind::Worker)
    }

    /// Runs one request through the interceptor. Requests it does not handle
    /// go straight to the origin.
    pub async fn get(&self, method: Method, url: &str) -> Result<(Response, Source)> {
        let url = Url::parse(url).or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
        let Some(interceptor) = self.active_lifecycle().await?.interceptor() else {
            exn::bail!(ErrorKind::NotActive(LifecycleState::Parsed));
        };
        let request = Request::new(method, url);
        match interceptor.handle(&request).await.or_raise(|| ErrorKind::Worker)? {
            Interception::Respond { response, source } => Ok((response, source)),
            Interception::Bypass => {
                tracing::debug!(url = %request.url, "Not cached; passing through");
                let fetch = FetchRequest::get(request.url).with_method(request.method);
                let response = self.ctx.fetcher.fetch(&fetch).await.or_raise(|| ErrorKind::Worker)?;
                Ok((response, Source::Network))
            },
        }
    }

    pub async fn offline(&self) -> Result<OfflineReport> {
        let mut lifecycle = self.active_lifecycle().await?;
        match lifecycle.handle(Command::DownloadOffline).await.or_raise(|| ErrorKind::Worker)? {
            Outcome::OfflineComplete(report) => Ok(report),
            _ => Ok(OfflineReport::default()),
        }
    }

    pub async fn status(&self) -> Result<Status> {
        let store = self.ctx.store.as_ref();
        let mut entries = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            let keys = store.keys(partition).await.or_raise(|| ErrorKind::Store)?;
            entries.push((partition, keys.len()));
        }
        let recorded = recorded_manifest(store).await.or_raise(|| ErrorKind::Worker)?;
        Ok(Status {
            state: self.lifecycle().await?.state(),
            entries,
            recorded: recorded.map(|manifest| manifest.digest()),
            configured: self.manifest.digest(),
        })
    }

    pub async fn purge(&self) -> Result<()> {
        shellcache_worker::purge(self.ctx.store.as_ref()).await.or_raise(|| ErrorKind::Worker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Where the configured manifest stands.
    pub state: LifecycleState,
    pub entries: Vec<(Partition, usize)>,
    /// Digest of the manifest that last activated, if any.
    pub recorded: Option<String>,
    pub configured: String,
}
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "configured manifest: {} ({})", self.configured, self.state)?;
        writeln!(f, "recorded manifest:   {}", self.recorded.as_deref().unwrap_or("none"))?;
        for (partition, count) in &self.entries {
            writeln!(f, "{:<10} {count} entries", partition.as_str())?;
        }
        Ok(())
    }
}
