//! Self-update core: resolve the latest release of a channel from a static
//! HTTP index, replace the running executable atomically, and restart into
//! it once in-flight work has drained.

mod busy;
mod descriptor;
mod download;
mod error;
mod identity;
mod index;
mod install;
mod restart;
mod scheduler;
mod updater;

pub use busy::{BusyBarrier, BusyGuard, DEFAULT_DRAIN_TIMEOUT, DrainOutcome, ExclusiveGuard};
pub use descriptor::{VersionDescriptor, latest_url};
pub use download::ArtifactStream;
pub use error::{ErrorClass, UpdateError};
pub use identity::{DEFAULT_CHANNEL, Mode, RunningIdentity, UNCONFIGURED};
pub use index::{HttpConfig, IndexClient};
pub use install::{AtomicInstaller, InstallTransaction, Installer, cleanup_previous_install};
pub use restart::{
    PreRestartHook, RESTART_DELAY_ENV, RestartOrchestrator, RestartPhase, Restarter,
    SpawnRestarter, default_restarter, restart_delay_from, startup_delay,
};
#[cfg(unix)]
pub use restart::ExecRestarter;
pub use scheduler::Scheduler;
pub use updater::{UpdateOutcome, Updater, UpdaterBuilder, UpdaterConfig};
