use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use respawn_platform::Target;
use tokio::sync::mpsc;

use crate::busy::{BusyBarrier, BusyGuard, DEFAULT_DRAIN_TIMEOUT};
use crate::descriptor::VersionDescriptor;
use crate::error::UpdateError;
use crate::identity::{DEFAULT_CHANNEL, RunningIdentity};
use crate::index::{HttpConfig, IndexClient};
use crate::install::{AtomicInstaller, Installer};
use crate::restart::{
    PreRestartHook, RestartOrchestrator, RestartPhase, Restarter, default_restarter,
};

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Delay before the first scheduled check after a cold start.
    pub initial_delay: Duration,
    pub check_interval: Duration,
    /// Upper bound on waiting for busy work before restarting.
    pub drain_timeout: Duration,
    /// Startup delay requested from the restarted process.
    pub restart_delay: Duration,
    pub http: HttpConfig,
    /// Executable to replace; defaults to the running one.
    pub executable: Option<PathBuf>,
    /// Platform to fetch builds for; defaults to the running one.
    pub target: Target,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(60 * 60),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            restart_delay: Duration::from_secs(1),
            http: HttpConfig::default(),
            executable: None,
            target: Target::current(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The channel already points at the running build.
    UpToDate(VersionDescriptor),
    /// Another attempt held the single-flight lock; nothing was done.
    AlreadyRunning,
    /// The new build is installed and the restarter handed control over.
    Restarted(VersionDescriptor),
}

/// Why the scheduler loop should run a check now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Trigger {
    Manual,
    Peer { git_tag: String },
}

/// Process-wide self-update context.
///
/// Owns the running identity, the busy barrier and the single-flight lock.
/// Every update attempt, scheduled or operator-driven, goes through it.
pub struct Updater {
    identity: RunningIdentity,
    config: UpdaterConfig,
    executable: PathBuf,
    index: IndexClient,
    installer: Arc<dyn Installer>,
    restart: RestartOrchestrator,
    barrier: BusyBarrier,
    single_flight: tokio::sync::Mutex<()>,
    triggers: mpsc::Sender<Trigger>,
    pending_triggers: Mutex<Option<mpsc::Receiver<Trigger>>>,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("identity", &self.identity)
            .field("executable", &self.executable)
            .field("target", &self.config.target)
            .finish_non_exhaustive()
    }
}

pub struct UpdaterBuilder {
    identity: RunningIdentity,
    config: UpdaterConfig,
    installer: Arc<dyn Installer>,
    restarter: Arc<dyn Restarter>,
    pre_restart: Option<PreRestartHook>,
}

impl UpdaterBuilder {
    #[must_use]
    pub fn config(mut self, config: UpdaterConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    #[must_use]
    pub fn restarter(mut self, restarter: Arc<dyn Restarter>) -> Self {
        self.restarter = restarter;
        self
    }

    #[must_use]
    pub fn pre_restart(mut self, hook: PreRestartHook) -> Self {
        self.pre_restart = Some(hook);
        self
    }

    /// # Errors
    /// Returns a configuration error when the running executable cannot be
    /// located, or a network error when the HTTP client cannot be built.
    pub fn build(self) -> Result<Arc<Updater>, UpdateError> {
        let executable = match &self.config.executable {
            Some(path) => path.clone(),
            None => respawn_platform::self_exe()
                .map_err(|error| UpdateError::Configuration(error.to_string()))?,
        };
        let index = IndexClient::new(self.identity.host(), &self.config.http)?;
        let barrier = BusyBarrier::new(self.config.drain_timeout);
        let mut restart =
            RestartOrchestrator::new(barrier.clone(), self.restarter, self.config.restart_delay);
        if let Some(hook) = self.pre_restart {
            restart = restart.with_pre_restart(hook);
        }
        let (triggers, pending) = mpsc::channel(1);

        Ok(Arc::new(Updater {
            identity: self.identity,
            config: self.config,
            executable,
            index,
            installer: self.installer,
            restart,
            barrier,
            single_flight: tokio::sync::Mutex::new(()),
            triggers,
            pending_triggers: Mutex::new(Some(pending)),
        }))
    }
}

impl Updater {
    #[must_use]
    pub fn builder(identity: RunningIdentity) -> UpdaterBuilder {
        UpdaterBuilder {
            identity,
            config: UpdaterConfig::default(),
            installer: Arc::new(AtomicInstaller),
            restarter: default_restarter(),
            pre_restart: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &RunningIdentity {
        &self.identity
    }

    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    #[must_use]
    pub fn barrier(&self) -> &BusyBarrier {
        &self.barrier
    }

    #[must_use]
    pub fn restart_phase(&self) -> RestartPhase {
        self.restart.phase()
    }

    /// Mark work that a restart must wait for. See [`BusyBarrier::enter`].
    #[must_use = "the operation ends as soon as the guard is dropped"]
    pub fn enter(&self) -> BusyGuard {
        self.barrier.enter()
    }

    /// Resolve the latest release of `channel` without acting on it.
    ///
    /// # Errors
    /// Configuration, network and protocol errors from the resolver.
    pub async fn latest(&self, channel: &str) -> Result<VersionDescriptor, UpdateError> {
        self.identity.ensure_configured()?;
        self.index
            .resolve(self.identity.project_name(), channel)
            .await
    }

    /// Check the running channel and, if it moved, install the new build and
    /// restart into it. A check already in flight makes this a no-op.
    ///
    /// # Errors
    /// Any resolve, gate, download, install or restart failure. The process
    /// keeps running the current binary in every case.
    pub async fn check_for_update(&self) -> Result<UpdateOutcome, UpdateError> {
        let Ok(_flight) = self.single_flight.try_lock() else {
            debug!("Update check already in progress, skipping");
            return Ok(UpdateOutcome::AlreadyRunning);
        };
        let channel = self.identity.channel();
        self.update_to(&channel, false).await
    }

    /// Move to `channel`: install its latest build and restart into it.
    ///
    /// Waits for an in-flight check to finish rather than skipping. Returns
    /// `Ok(false)` when `channel` is already the running channel and serves
    /// the running build.
    ///
    /// # Errors
    /// Any resolve, gate, download, install or restart failure. The running
    /// channel is only changed once the install succeeded.
    pub async fn switch_channel(&self, channel: &str) -> Result<bool, UpdateError> {
        let channel = if channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            channel
        };
        let _flight = self.single_flight.lock().await;
        info!("Switching to channel {channel}");
        match self.update_to(channel, true).await? {
            UpdateOutcome::Restarted(_) => Ok(true),
            UpdateOutcome::UpToDate(_) | UpdateOutcome::AlreadyRunning => Ok(false),
        }
    }

    /// Download `version` into `path` with the same atomic replacement the
    /// self-update uses, without restarting.
    ///
    /// # Errors
    /// Gate, download and install failures.
    pub async fn save_as(
        &self,
        version: &VersionDescriptor,
        path: &Path,
    ) -> Result<(), UpdateError> {
        self.index.check_arch(version, &self.config.target).await?;
        let artifact = self.index.download(version, &self.config.target).await?;
        self.installer.install(artifact, path).await
    }

    /// Note the version another instance of this project advertises.
    ///
    /// Queues an update check when the peer runs a different build that is
    /// strictly more recent than ours; returns whether a check was queued.
    pub fn report_peer_version(&self, git_tag: &str, build_timestamp: &str) -> bool {
        if git_tag.is_empty() || git_tag == self.identity.git_tag() {
            return false;
        }
        if !self.identity.is_older_than(build_timestamp) {
            return false;
        }
        debug!("Peer runs newer build {build_timestamp}/{git_tag}, queueing update check");
        self.queue(Trigger::Peer {
            git_tag: git_tag.to_string(),
        });
        true
    }

    /// Ask the scheduler loop for an immediate check.
    pub fn trigger_check(&self) {
        self.queue(Trigger::Manual);
    }

    fn queue(&self, trigger: Trigger) {
        // a full queue already holds a pending check
        let _ = self.triggers.try_send(trigger);
    }

    pub(crate) fn take_triggers(&self) -> Option<mpsc::Receiver<Trigger>> {
        self.pending_triggers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    async fn update_to(
        &self,
        channel: &str,
        switching: bool,
    ) -> Result<UpdateOutcome, UpdateError> {
        self.identity.ensure_configured()?;
        let version = self
            .index
            .resolve(self.identity.project_name(), channel)
            .await?;

        let same_build = version.git_tag == self.identity.git_tag();
        let same_channel = channel == self.identity.channel();
        if same_build && (!switching || same_channel) {
            info!(
                "Current version is up to date ({}, channel {channel})",
                version.git_tag
            );
            return Ok(UpdateOutcome::UpToDate(version));
        }

        info!(
            "New version found {}/{} (current: {}/{}) - downloading...",
            version.date_tag,
            version.git_tag,
            self.identity.date_tag(),
            self.identity.git_tag()
        );
        self.index.check_arch(&version, &self.config.target).await?;
        let artifact = self.index.download(&version, &self.config.target).await?;
        self.installer.install(artifact, &self.executable).await?;

        if switching {
            self.identity.set_channel(channel);
        }

        info!("Program upgraded, restarting");
        self.restart.restart(&self.executable).await?;
        Ok(UpdateOutcome::Restarted(version))
    }
}
