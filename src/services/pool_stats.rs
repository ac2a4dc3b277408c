//! Periodic pool statistics logging

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::refresher::{PeriodicRefresher, RefresherHandle};
use crate::proxy::pool::{PoolStats, ProxyPool};

pub struct PoolStatsReporter {
    pool: Arc<ProxyPool>,
    last: Mutex<Option<PoolStats>>,
}

impl PoolStatsReporter {
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        Self {
            pool,
            last: Mutex::new(None),
        }
    }

    /// Log the current stats; unchanged stats are only logged at debug level.
    /// Returns whether they changed since the previous report.
    pub fn report(&self) -> bool {
        let stats = self.pool.stats();
        let mut last = self.last.lock();

        let changed = last.as_ref() != Some(&stats);
        if changed {
            info!(
                total = stats.total,
                selectable = stats.selectable(),
                "{}",
                stats
            );
        } else {
            debug!("{}", stats);
        }
        *last = Some(stats);
        changed
    }

    /// Report every `period`; `None` when `period` is zero
    pub fn start(self, period: Duration) -> Option<RefresherHandle> {
        let reporter = Arc::new(self);
        PeriodicRefresher::start("pool-stats", period, false, move || {
            let reporter = reporter.clone();
            async move {
                reporter.report();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackoffPolicy, Proxy};

    #[test]
    fn test_report_detects_changes() {
        let pool = Arc::new(ProxyPool::new(BackoffPolicy::default()));
        let reporter = PoolStatsReporter::new(pool.clone());

        assert!(reporter.report());
        assert!(!reporter.report());

        pool.add(Proxy::parse("1.1.1.1:80").unwrap());
        assert!(reporter.report());
    }

    #[tokio::test]
    async fn test_zero_period_disables_reporter() {
        let pool = Arc::new(ProxyPool::new(BackoffPolicy::default()));
        assert!(PoolStatsReporter::new(pool).start(Duration::ZERO).is_none());
    }
}
