use std::ffi::OsString;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use crate::busy::{BusyBarrier, DrainOutcome};
use crate::error::UpdateError;

/// Environment variable telling a freshly restarted process to wait before
/// starting up, and to skip its first update check.
pub const RESTART_DELAY_ENV: &str = "RESPAWN_DELAY";

/// Runs right before the process image is replaced, e.g. to flush state or
/// to clear close-on-exec on descriptors the new image should inherit.
pub type PreRestartHook = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Hands control over to a new executable.
///
/// In-place strategies never return on success. A strategy that returns
/// `Ok(())` has arranged for the current process to be stopped by someone
/// else (a supervisor, an init system).
pub trait Restarter: Send + Sync {
    /// # Errors
    /// Returns a process error when the new executable could not be started;
    /// the current process keeps running.
    fn restart(&self, executable: &Path, delay: Duration) -> Result<(), UpdateError>;
}

/// Replaces the process image in place, keeping the pid.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecRestarter;

#[cfg(unix)]
impl Restarter for ExecRestarter {
    fn restart(&self, executable: &Path, delay: Duration) -> Result<(), UpdateError> {
        use std::os::unix::process::CommandExt;

        let (arg0, args) = current_args(executable);
        info!("Restarting in place: {}", executable.display());
        let error = std::process::Command::new(executable)
            .arg0(arg0)
            .args(args)
            .env(RESTART_DELAY_ENV, delay.as_secs().to_string())
            .exec();
        Err(UpdateError::process("failed to exec new executable", error))
    }
}

/// Starts the new executable as a child with inherited stdio, then exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnRestarter;

impl Restarter for SpawnRestarter {
    fn restart(&self, executable: &Path, delay: Duration) -> Result<(), UpdateError> {
        let (_, args) = current_args(executable);
        info!("Restarting via new process: {}", executable.display());
        std::process::Command::new(executable)
            .args(args)
            .env(RESTART_DELAY_ENV, delay.as_secs().to_string())
            .spawn()
            .map_err(|error| UpdateError::process("failed to spawn new executable", error))?;
        std::process::exit(0)
    }
}

/// The restart strategy for this platform: in-place exec where available,
/// spawn-and-exit elsewhere.
#[must_use]
pub fn default_restarter() -> Arc<dyn Restarter> {
    #[cfg(unix)]
    {
        Arc::new(ExecRestarter)
    }
    #[cfg(not(unix))]
    {
        Arc::new(SpawnRestarter)
    }
}

fn current_args(executable: &Path) -> (OsString, Vec<OsString>) {
    let mut args = std::env::args_os();
    let arg0 = args
        .next()
        .unwrap_or_else(|| executable.as_os_str().to_os_string());
    (arg0, args.collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Idle,
    Draining,
    PreHook,
    Replacing,
    Restarted,
    FailedResumedOld,
}

/// Drains busy work, runs the pre-restart hook, then hands over to the new
/// executable. On any failure the exclusive hold is released and the
/// current process carries on with the old code.
pub struct RestartOrchestrator {
    barrier: BusyBarrier,
    restarter: Arc<dyn Restarter>,
    pre_restart: Option<PreRestartHook>,
    delay: Duration,
    phase: Mutex<RestartPhase>,
}

impl RestartOrchestrator {
    #[must_use]
    pub fn new(barrier: BusyBarrier, restarter: Arc<dyn Restarter>, delay: Duration) -> Self {
        Self {
            barrier,
            restarter,
            pre_restart: None,
            delay,
            phase: Mutex::new(RestartPhase::Idle),
        }
    }

    #[must_use]
    pub fn with_pre_restart(mut self, hook: PreRestartHook) -> Self {
        self.pre_restart = Some(hook);
        self
    }

    #[must_use]
    pub fn phase(&self) -> RestartPhase {
        *self
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn enter_phase(&self, phase: RestartPhase) {
        info!("Restart phase: {phase:?}");
        *self
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = phase;
    }

    /// # Errors
    /// Returns a process error when the hook or the restarter fails. The
    /// process is then still running the old binary with the barrier
    /// released.
    pub async fn restart(&self, executable: &Path) -> Result<(), UpdateError> {
        self.enter_phase(RestartPhase::Draining);
        let exclusive = self.barrier.acquire_exclusive().await;
        if let DrainOutcome::TimedOut { outstanding } = exclusive.outcome() {
            warn!("Restarting with {outstanding} operation(s) still marked busy");
        }

        if let Some(hook) = &self.pre_restart {
            self.enter_phase(RestartPhase::PreHook);
            if let Err(details) = hook() {
                return Err(self.resume_old(UpdateError::process(
                    "pre-restart hook failed",
                    details,
                )));
            }
        }

        self.enter_phase(RestartPhase::Replacing);
        match self.restarter.restart(executable, self.delay) {
            Ok(()) => {
                self.enter_phase(RestartPhase::Restarted);
                Ok(())
            }
            Err(error) => Err(self.resume_old(error)),
        }
    }

    fn resume_old(&self, error: UpdateError) -> UpdateError {
        error!("Restart failed, continuing on the current binary: {error}");
        self.enter_phase(RestartPhase::FailedResumedOld);
        error
    }
}

/// Parse the restart marker value (whole seconds).
#[must_use]
pub fn restart_delay_from(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Honor the restart marker left by the previous process image: sleep for
/// the requested delay. Returns whether the marker was present, in which
/// case the caller should skip its immediate update check.
pub async fn startup_delay() -> bool {
    let value = std::env::var(RESTART_DELAY_ENV).ok();
    let Some(delay) = restart_delay_from(value.as_deref()) else {
        return false;
    };
    info!("Just upgraded, delaying program start by {delay:?}");
    tokio::time::sleep(delay).await;
    true
}
