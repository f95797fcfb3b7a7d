//! Quiescence barrier between business work and binary replacement.
//!
//! Business code brackets work it does not want interrupted with
//! [`BusyBarrier::enter`]; the restart path calls
//! [`BusyBarrier::acquire_exclusive`], which waits for every outstanding
//! entry to leave.
//!
//! Entering never blocks, not even while a drain is in progress: an entry
//! made during the drain is counted and the drain waits for it as well. The
//! wait is bounded so that a guard leaked by a buggy caller cannot hold
//! updates back forever; past the bound the drain proceeds anyway and
//! reports [`DrainOutcome::TimedOut`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};

/// Default bound on how long a drain waits for busy work.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct BusyBarrier {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    count: watch::Sender<usize>,
    exclusive: Arc<Mutex<()>>,
    drain_timeout: Duration,
}

impl BusyBarrier {
    #[must_use]
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                count: watch::Sender::new(0),
                exclusive: Arc::new(Mutex::new(())),
                drain_timeout,
            }),
        }
    }

    /// Mark the start of work that must not be cut short by a restart.
    /// Never blocks; the work ends when the guard is dropped.
    #[must_use = "the operation ends as soon as the guard is dropped"]
    pub fn enter(&self) -> BusyGuard {
        self.inner.count.send_modify(|count| *count += 1);
        BusyGuard {
            barrier: self.clone(),
        }
    }

    /// Number of entries that have not left yet.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        *self.inner.count.borrow()
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.inner.drain_timeout
    }

    /// Wait until no entry is outstanding, or until the drain timeout
    /// elapses, and hold exclusive access until the returned guard drops.
    ///
    /// Only one exclusive holder exists at a time; a second caller waits for
    /// the first guard to be released before it starts draining.
    pub async fn acquire_exclusive(&self) -> ExclusiveGuard {
        let permit = Arc::clone(&self.inner.exclusive).lock_owned().await;

        let pending = self.busy_count();
        if pending > 0 {
            info!("Waiting for {pending} busy operation(s) to finish");
        }

        let mut count = self.inner.count.subscribe();
        let drained = tokio::time::timeout(
            self.inner.drain_timeout,
            count.wait_for(|outstanding| *outstanding == 0),
        )
        .await
        .is_ok();

        let outcome = if drained {
            debug!("Busy barrier drained");
            DrainOutcome::Drained
        } else {
            let outstanding = self.busy_count();
            warn!(
                "Busy barrier still has {outstanding} operation(s) after {:?}, proceeding anyway",
                self.inner.drain_timeout
            );
            DrainOutcome::TimedOut { outstanding }
        };

        ExclusiveGuard {
            _permit: permit,
            outcome,
        }
    }

    fn leave(&self) {
        self.inner
            .count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl Default for BusyBarrier {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

/// An operation in progress; dropping it is the matching `leave`.
#[derive(Debug)]
pub struct BusyGuard {
    barrier: BusyBarrier,
}

impl BusyGuard {
    pub fn leave(self) {
        drop(self);
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.barrier.leave();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut { outstanding: usize },
}

/// Exclusive hold on the barrier; dropping it releases the hold.
#[derive(Debug)]
pub struct ExclusiveGuard {
    _permit: OwnedMutexGuard<()>,
    outcome: DrainOutcome,
}

impl ExclusiveGuard {
    #[must_use]
    pub fn outcome(&self) -> DrainOutcome {
        self.outcome
    }

    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::{Instant, sleep};

    use super::{BusyBarrier, DrainOutcome};

    #[derive(Clone, Default)]
    struct Markers(Arc<Mutex<String>>);

    impl Markers {
        fn push(&self, marker: &str) {
            self.0.lock().expect("marker lock").push_str(marker);
        }

        fn snapshot(&self) -> String {
            self.0.lock().expect("marker lock").clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_the_last_leave() {
        let barrier = BusyBarrier::new(Duration::from_secs(3600));
        let markers = Markers::default();
        let start = Instant::now();

        let workers: Vec<_> = (0..3u64)
            .map(|i| {
                let barrier = barrier.clone();
                let markers = markers.clone();
                tokio::spawn(async move {
                    markers.push("0");
                    sleep(Duration::from_millis(100)).await;
                    markers.push("1");
                    sleep(Duration::from_millis(100 + 10 * i)).await;
                    let guard = barrier.enter();
                    markers.push("2");
                    sleep(Duration::from_millis(100)).await;
                    markers.push("3");
                    guard.leave();
                })
            })
            .collect();

        sleep(Duration::from_millis(250)).await;
        assert_eq!(markers.snapshot(), "000111222");
        assert_eq!(barrier.busy_count(), 3);

        let exclusive = barrier.acquire_exclusive().await;
        markers.push("!");

        assert_eq!(exclusive.outcome(), DrainOutcome::Drained);
        assert!(start.elapsed() >= Duration::from_millis(320));
        exclusive.release();

        for worker in workers {
            worker.await.expect("worker should finish");
        }
        assert_eq!(markers.snapshot(), "000111222333!");
        assert_eq!(barrier.busy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_entrant_does_not_block_forever() {
        let barrier = BusyBarrier::new(Duration::from_secs(3600));
        std::mem::forget(barrier.enter());
        let start = Instant::now();

        let exclusive = barrier.acquire_exclusive().await;

        assert_eq!(
            exclusive.outcome(),
            DrainOutcome::TimedOut { outstanding: 1 }
        );
        assert!(start.elapsed() >= Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn idle_barrier_drains_immediately() {
        let barrier = BusyBarrier::default();
        let exclusive = barrier.acquire_exclusive().await;
        assert_eq!(exclusive.outcome(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn enter_never_blocks_while_exclusive_is_held() {
        let barrier = BusyBarrier::default();
        let exclusive = barrier.acquire_exclusive().await;

        let from_thread = barrier.clone();
        let guard = std::thread::spawn(move || from_thread.enter())
            .join()
            .expect("enter from a plain thread should return");

        assert_eq!(barrier.busy_count(), 1);
        drop(guard);
        assert_eq!(barrier.busy_count(), 0);
        exclusive.release();
    }

    #[tokio::test(start_paused = true)]
    async fn entries_made_during_a_drain_are_waited_for() {
        let barrier = BusyBarrier::new(Duration::from_secs(3600));
        let first = barrier.enter();
        let markers = Markers::default();

        let late = {
            let barrier = barrier.clone();
            let markers = markers.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                let guard = barrier.enter();
                drop(first);
                sleep(Duration::from_millis(50)).await;
                markers.push("late-done,");
                drop(guard);
            })
        };

        let exclusive = barrier.acquire_exclusive().await;
        markers.push("drained");

        assert_eq!(exclusive.outcome(), DrainOutcome::Drained);
        assert_eq!(markers.snapshot(), "late-done,drained");
        late.await.expect("late worker should finish");
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_holders_are_serialized() {
        let barrier = BusyBarrier::default();
        let first = barrier.acquire_exclusive().await;

        let second = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.acquire_exclusive().await.outcome() })
        };

        sleep(Duration::from_millis(10)).await;
        assert!(!second.is_finished());

        first.release();
        assert_eq!(
            second.await.expect("second holder should run"),
            DrainOutcome::Drained
        );
    }
}
