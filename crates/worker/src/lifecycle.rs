//! Install and activation of one manifest version.
//!
//! ```text
//! Parsed -> Installing -> Waiting -> Activating -> Active
//!                |                       |
//!                v                       v
//!              Failed                 Failed -> Purged
//! ```
//!
//! A [`Lifecycle`] owns its state and is driven one [`Command`] at a time,
//! either directly through [`Lifecycle::handle`] or from a channel with
//! [`Lifecycle::run`].

use crate::error::{ErrorKind, Result};
use crate::fetch::{CacheMode, FetchRequest, fetch_success};
use crate::intercept::Interceptor;
use crate::offline::{OfflineReport, download_offline};
use crate::reconcile::{Reconciliation, clear_staged, mark_staged, reconcile, recorded_manifest, staged_digest};
use crate::Context;
use derive_more::Display;
use exn::ResultExt;
use futures::future::try_join_all;
use shellcache_manifest::{Manifest, ResourceKey};
use shellcache_storage::{CacheStore, Partition, Response};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::instrument;

/// Buffered claim notifications per subscriber.
const CLIENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created, install not triggered yet.
    #[display("parsed")]
    Parsed,
    #[display("installing")]
    Installing,
    /// Core set staged; waiting to take over.
    #[display("waiting")]
    Waiting,
    #[display("activating")]
    Activating,
    /// Serving requests.
    #[display("active")]
    Active,
    #[display("failed")]
    Failed,
    /// Activation failed and every partition was cleared.
    #[display("purged")]
    Purged,
}

/// Inbound lifecycle triggers.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    #[display("install")]
    Install,
    #[display("activate")]
    Activate,
    /// Activate now, without waiting for the previous version's clients.
    #[display("skip waiting")]
    SkipWaiting,
    /// Cache every manifest entry for offline use.
    #[display("download offline")]
    DownloadOffline,
}

/// Notifications for connected clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// This version is now authoritative; clients should route through it.
    Claimed { digest: String },
}

/// What handling a command achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Installed; activation will wait for an explicit trigger.
    Waiting,
    Activated(Reconciliation),
    /// The command does not apply in the current state.
    Ignored,
    OfflineComplete(OfflineReport),
}

/// Purges every partition: `content`, `staging` and the manifest record.
///
/// Attempts every partition even after a failure, so as much as possible is
/// cleared; the first failure is returned.
pub async fn purge(store: &dyn CacheStore) -> Result<()> {
    let mut first_failure = None;
    for partition in Partition::ALL {
        if let Err(e) = store.delete_partition(partition).await {
            tracing::error!(%partition, error = ?e, "Could not purge partition");
            first_failure.get_or_insert(e);
        }
    }
    match first_failure {
        None => Ok(()),
        Some(e) => Err(e).or_raise(|| ErrorKind::Purge),
    }
}

/// Lifecycle of one manifest version.
///
/// Only one command is processed at a time (`handle` takes `&mut self`), so
/// install and activation can never interleave and the reconciler runs at
/// most once per instance.
pub struct Lifecycle {
    ctx: Context,
    manifest: Arc<Manifest>,
    state: LifecycleState,
    skip_waiting: bool,
    clients: broadcast::Sender<ClientEvent>,
}

impl Lifecycle {
    pub fn new(ctx: Context, manifest: impl Into<Arc<Manifest>>) -> Self {
        let (clients, _) = broadcast::channel(CLIENT_CHANNEL_CAPACITY);
        Self {
            ctx,
            manifest: manifest.into(),
            state: LifecycleState::Parsed,
            skip_waiting: true,
            clients,
        }
    }

    /// Picks up where an earlier process left off with the same manifest.
    ///
    /// - [`Active`](LifecycleState::Active) if `manifest` is the recorded one,
    /// - [`Waiting`](LifecycleState::Waiting) if `staging` was filled by an
    ///   install of this very manifest and still holds its whole core set,
    /// - [`Parsed`](LifecycleState::Parsed) otherwise.
    ///
    /// Staged bytes belonging to another manifest never make this one
    /// `Waiting`, even when the core keys coincide; that also covers an empty
    /// core set.
    pub async fn resume(ctx: Context, manifest: impl Into<Arc<Manifest>>) -> Result<Self> {
        let mut lifecycle = Self::new(ctx, manifest);
        let store = lifecycle.ctx.store.as_ref();
        let digest = lifecycle.manifest.digest();
        if recorded_manifest(store).await?.as_ref() == Some(lifecycle.manifest.as_ref()) {
            lifecycle.state = LifecycleState::Active;
        } else if staged_digest(store).await?.as_deref() == Some(digest.as_str()) {
            let staged = store.keys(Partition::Staging).await.or_raise(|| ErrorKind::Storage)?;
            if lifecycle.manifest.core().iter().all(|key| staged.contains(key)) {
                lifecycle.state = LifecycleState::Waiting;
            }
        }
        tracing::debug!(state = %lifecycle.state, "Resumed lifecycle");
        Ok(lifecycle)
    }

    /// Whether a successful install activates straight away (the default).
    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.clients.subscribe()
    }

    /// Request interceptor for this version, only once it is active.
    pub fn interceptor(&self) -> Option<Interceptor> {
        (self.state == LifecycleState::Active).then(|| Interceptor::new(self.ctx.clone(), self.manifest.clone()))
    }

    /// Processes a single command.
    ///
    /// `SkipWaiting` outside `Waiting` is ignored. Every other command that
    /// doesn't fit the current state is an
    /// [`InvalidTransition`](ErrorKind::InvalidTransition) and changes nothing.
    #[instrument(skip(self), fields(digest = %self.manifest.digest(), state = %self.state))]
    pub async fn handle(&mut self, command: Command) -> Result<Outcome> {
        match (command, self.state) {
            (Command::Install, LifecycleState::Parsed) => self.install().await,
            (Command::Activate | Command::SkipWaiting, LifecycleState::Waiting) => {
                self.activate().await.map(Outcome::Activated)
            },
            (Command::SkipWaiting, state) => {
                tracing::debug!(%state, "Not waiting; ignoring skip-waiting");
                Ok(Outcome::Ignored)
            },
            (Command::DownloadOffline, LifecycleState::Active) => {
                download_offline(&self.ctx, &self.manifest).await.map(Outcome::OfflineComplete)
            },
            (command, state) => exn::bail!(ErrorKind::InvalidTransition { command, state }),
        }
    }

    /// Drains `commands` until every sender is gone.
    ///
    /// Offline downloads run as spawned tasks so they never hold up lifecycle
    /// commands; they are awaited before returning. Failures are logged.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        let mut offline = JoinSet::new();
        while let Some(command) = commands.recv().await {
            if command == Command::DownloadOffline && self.state == LifecycleState::Active {
                let ctx = self.ctx.clone();
                let manifest = self.manifest.clone();
                offline.spawn(async move { download_offline(&ctx, &manifest).await });
                continue;
            }
            if let Err(e) = self.handle(command).await {
                tracing::error!(%command, error = ?e, "Lifecycle command failed");
            }
        }
        while let Some(joined) = offline.join_next().await {
            match joined {
                Ok(Ok(report)) => tracing::info!(fetched = report.fetched.len(), failed = report.failed.len(), "Offline download finished"),
                Ok(Err(e)) => tracing::error!(error = ?e, "Offline download failed"),
                Err(e) => tracing::error!(error = %e, "Offline download task panicked"),
            }
        }
        self
    }

    async fn install(&mut self) -> Result<Outcome> {
        self.state = LifecycleState::Installing;
        if let Err(e) = self.stage_core().await {
            self.state = LifecycleState::Failed;
            tracing::error!(error = ?e, "Install failed");
            return Err(e);
        }
        self.state = LifecycleState::Waiting;
        tracing::info!(core = self.manifest.core().len(), "Installed");
        match self.skip_waiting {
            true => self.activate().await.map(Outcome::Activated),
            false => Ok(Outcome::Waiting),
        }
    }

    /// Fetches the whole core set, bypassing HTTP caches, and writes it to
    /// `staging` only once every fetch has succeeded.
    async fn stage_core(&self) -> Result<()> {
        let store = self.ctx.store.as_ref();
        clear_staged(store).await.or_raise(|| ErrorKind::Install)?;
        store.delete_partition(Partition::Staging).await.or_raise(|| ErrorKind::Storage).or_raise(|| ErrorKind::Install)?;

        let ctx = &self.ctx;
        let fetches = self.manifest.core().iter().map(|key| async move {
            let url = ctx.scope.url_for(key).or_raise(|| ErrorKind::Fetch(key.clone()))?;
            let request = FetchRequest::get(url).with_mode(CacheMode::Reload);
            let response = fetch_success(ctx.fetcher.as_ref(), &request).await.or_raise(|| ErrorKind::Fetch(key.clone()))?;
            Ok::<(&ResourceKey, Response), crate::error::Error>((key, response))
        });
        let staged = try_join_all(fetches).await.or_raise(|| ErrorKind::Install)?;

        for (key, response) in &staged {
            store
                .put(Partition::Staging, key, response)
                .await
                .or_raise(|| ErrorKind::Storage)
                .or_raise(|| ErrorKind::Install)?;
        }
        mark_staged(store, &self.manifest).await.or_raise(|| ErrorKind::Install)?;
        Ok(())
    }

    /// Runs the reconciler once and claims clients. Any failure purges the
    /// whole store, leaving it as a first install would find it.
    async fn activate(&mut self) -> Result<Reconciliation> {
        self.state = LifecycleState::Activating;
        let store = self.ctx.store.as_ref();
        match reconcile(store, &self.manifest).await {
            Ok(report) => {
                self.state = LifecycleState::Active;
                let digest = self.manifest.digest();
                tracing::info!(%digest, "Activated; claiming clients");
                if self.clients.send(ClientEvent::Claimed { digest }).is_err() {
                    tracing::debug!("No clients to claim");
                }
                Ok(report)
            },
            Err(e) => {
                self.state = LifecycleState::Failed;
                tracing::error!(error = ?e, "Activation failed; purging cache");
                purge(store).await?;
                self.state = LifecycleState::Purged;
                Err(e).or_raise(|| ErrorKind::Activation)
            },
        }
    }
}
