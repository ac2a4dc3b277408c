//! Fixed-schedule background refresh
//!
//! Ticks on a fixed grid (`interval_at` with [`MissedTickBehavior::Skip`]).
//! A tick that arrives while the previous invocation is still running is
//! skipped and logged; the next tick stays on the original grid.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::acquisition::RefreshPlan;
use crate::coordinator::PoolCoordinator;

#[derive(Debug, Default)]
struct Counters {
    invocations: AtomicUsize,
    skipped: AtomicUsize,
}

pub struct PeriodicRefresher;

impl PeriodicRefresher {
    /// Spawn the scheduler task and return its handle
    ///
    /// With `fire_immediately` the first invocation starts right away,
    /// otherwise after one full `period`. A zero `period` disables the
    /// refresher and returns `None`.
    pub fn start<F, Fut>(
        name: &'static str,
        period: Duration,
        fire_immediately: bool,
        op: F,
    ) -> Option<RefresherHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            debug!(refresher = name, "Zero period, periodic refresher disabled");
            return None;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let running = Arc::new(AtomicBool::new(false));
        let op = Arc::new(op);

        let start = if fire_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let task_stopped = stopped.clone();
        let task_counters = counters.clone();
        tokio::spawn(async move {
            info!(
                refresher = name,
                period_secs = period.as_secs(),
                fire_immediately,
                "Starting periodic refresher"
            );
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if task_stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        if running
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                        {
                            task_counters.skipped.fetch_add(1, Ordering::SeqCst);
                            warn!(refresher = name, "Previous refresh still running, skipping tick");
                            continue;
                        }

                        task_counters.invocations.fetch_add(1, Ordering::SeqCst);
                        let op = op.clone();
                        let running = running.clone();
                        tokio::spawn(async move {
                            if let Err(e) = tokio::spawn(op()).await {
                                error!(refresher = name, error = %e, "Refresh task failed");
                            }
                            running.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!(refresher = name, "Periodic refresher shutting down");
                            break;
                        }
                    }
                }
            }
        });

        Some(RefresherHandle {
            name,
            shutdown_tx,
            stopped,
            counters,
        })
    }

    /// Discovery-only refresh of the coordinator's pool
    pub fn for_coordinator(
        coordinator: Arc<PoolCoordinator>,
        period: Duration,
        fire_immediately: bool,
    ) -> Option<RefresherHandle> {
        Self::start("proxy-refresh", period, fire_immediately, move || {
            let coordinator = coordinator.clone();
            async move {
                let report = coordinator.replenish(RefreshPlan::DISCOVERY_ONLY, false).await;
                info!(
                    found = report.proxies.len(),
                    added = report.added,
                    stats = %coordinator.pool().stats(),
                    "Periodic proxy refresh finished"
                );
            }
        })
    }
}

/// Handle for stopping a [`PeriodicRefresher`]
pub struct RefresherHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    stopped: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl RefresherHandle {
    /// Cancel future ticks; returns false if already stopped
    ///
    /// An invocation already in flight runs to completion.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.shutdown_tx.send(true);
        info!(refresher = self.name, "Periodic refresher stopped");
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Invocations started so far
    pub fn invocations(&self) -> usize {
        self.counters.invocations.load(Ordering::SeqCst)
    }

    /// Ticks skipped because an invocation was still running
    pub fn skipped(&self) -> usize {
        self.counters.skipped.load(Ordering::SeqCst)
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type BoxedOp = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    fn counting(calls: Arc<AtomicUsize>, work: Duration) -> impl Fn() -> BoxedOp + Send + Sync {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_then_on_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counting(calls.clone(), Duration::ZERO);
        let handle = PeriodicRefresher::start("test", Duration::from_secs(60), true, op).unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.invocations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_first_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counting(calls.clone(), Duration::ZERO);
        let _handle = PeriodicRefresher::start("test", Duration::from_secs(60), false, op).unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = PeriodicRefresher::start(
            "test",
            Duration::from_secs(60),
            true,
            counting(calls.clone(), Duration::from_secs(150)),
        )
        .unwrap();

        // Runs at 0 and 180; ticks at 60 and 120 land while busy
        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.skipped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counting(calls.clone(), Duration::ZERO);
        let handle = PeriodicRefresher::start("test", Duration::from_secs(60), true, op).unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(handle.is_stopped());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_disabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counting(calls.clone(), Duration::ZERO);
        assert!(PeriodicRefresher::start("test", Duration::ZERO, true, op).is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_refresh_runs_discovery_only() {
        use crate::acquisition::{AcquisitionChain, FileSource};
        use crate::config::Config;
        use crate::models::BackoffPolicy;
        use crate::proxy::pool::ProxyPool;
        use crate::proxy::user_agent::UserAgentAssigner;

        let chain = AcquisitionChain::new(
            FileSource::new(None, vec!["1.1.1.1:80".to_string()]),
            Config::default().discovery,
        );
        let coordinator = Arc::new(PoolCoordinator::new(
            Arc::new(ProxyPool::new(BackoffPolicy::default())),
            chain,
            UserAgentAssigner::default(),
        ));

        let handle =
            PeriodicRefresher::for_coordinator(coordinator.clone(), Duration::from_secs(60), true)
                .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        handle.stop();

        assert_eq!(coordinator.runs(), 1);
        assert!(coordinator.pool().is_empty());
    }
}
