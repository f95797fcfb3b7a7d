//! Background loop driving periodic and on-demand update checks.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::identity::Mode;
use crate::updater::{Trigger, UpdateOutcome, Updater};

/// Shortest period between timer checks. A zero interval would make the
/// ticker panic.
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Scheduler {
    updater: Arc<Updater>,
    triggers: tokio::sync::mpsc::Receiver<Trigger>,
    skip_initial: bool,
}

impl Scheduler {
    /// Take over the trigger queue of `updater`. Only one scheduler can be
    /// attached to an updater; later calls return `None`.
    ///
    /// With `skip_initial` the first check waits a full interval instead of
    /// the initial delay, for processes that were just restarted into a new
    /// build.
    #[must_use]
    pub fn new(updater: Arc<Updater>, skip_initial: bool) -> Option<Self> {
        let triggers = updater.take_triggers()?;
        Some(Self {
            updater,
            triggers,
            skip_initial,
        })
    }

    /// Start the loop if the identity runs in production mode.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.updater.identity().mode() != Mode::Production {
            info!("Auto-updater disabled since not in production mode");
            return None;
        }
        Some(tokio::spawn(self.run(cancel)))
    }

    /// Check on every tick, hangup signal and queued trigger until cancelled
    /// or until an update handed control to the new build. Failed checks are
    /// logged and retried on the next tick.
    pub async fn run(mut self, cancel: CancellationToken) {
        let config = self.updater.config();
        let period = config.check_interval.max(MIN_CHECK_INTERVAL);
        if period != config.check_interval {
            warn!(
                "Check interval {:?} is too short, using {period:?}",
                config.check_interval
            );
        }
        let first = if self.skip_initial {
            period
        } else {
            config.initial_delay
        };
        let mut ticker = tokio::time::interval_at(Instant::now() + first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut hangup = Hangup::install();

        info!("Auto-updater running, next check in {first:?} then every {period:?}");

        loop {
            let reason = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Auto-updater stopping");
                    return;
                }
                _ = ticker.tick() => "timer".to_string(),
                () = hangup.recv() => "SIGHUP".to_string(),
                Some(trigger) = self.triggers.recv() => match trigger {
                    Trigger::Manual => "manual request".to_string(),
                    Trigger::Peer { git_tag } => format!("peer running {git_tag}"),
                },
            };

            debug!("Checking for updates ({reason})");
            match self.updater.check_for_update().await {
                Ok(UpdateOutcome::Restarted(version)) => {
                    info!("Handed over to {}, auto-updater done", version.git_tag);
                    return;
                }
                Ok(UpdateOutcome::UpToDate(_) | UpdateOutcome::AlreadyRunning) => {}
                Err(err) => error!("Update check failed: {err}"),
            }
        }
    }
}

/// SIGHUP as a check trigger. Never fires where the signal does not exist
/// or could not be registered.
struct Hangup {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl Hangup {
    fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let signal = signal(SignalKind::hangup())
                .inspect_err(|err| warn!("SIGHUP trigger unavailable: {err}"))
                .ok();
            Self { signal }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(signal) = &mut self.signal {
            if signal.recv().await.is_some() {
                return;
            }
            self.signal = None;
        }
        std::future::pending::<()>().await;
    }
}
