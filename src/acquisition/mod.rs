//! Proxy acquisition chain
//!
//! Sources are tried in order: proxy list file (or inline list), external
//! discovery helper, in-process broker. Every source error is logged,
//! recorded as a [`RefreshJob`] and treated as an empty result.

pub mod broker;
pub mod external;
pub mod file;
pub mod http;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

pub use broker::{DiscoveryQuery, DiscoveryType, FeedBroker, ProxyBroker};
pub use external::ExternalProcessSource;
pub use file::FileSource;

use crate::config::{Config, DiscoveryConfig};
use crate::error::Result;
use crate::models::{Proxy, RefreshJob, RefreshReport, RefreshSource};
use crate::proxy::pool::ProxyPool;

const BROKER_QUEUE_CAPACITY: usize = 64;

/// Which stages of the chain a run may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPlan {
    pub read_file: bool,
    pub discover: bool,
}

impl RefreshPlan {
    /// Cheapest source only
    pub const FILE_ONLY: Self = Self {
        read_file: true,
        discover: false,
    };
    /// External helper and broker, skipping the file
    pub const DISCOVERY_ONLY: Self = Self {
        read_file: false,
        discover: true,
    };
    /// File, then external helper, then broker
    pub const FULL: Self = Self {
        read_file: true,
        discover: true,
    };
}

/// Gate evaluated after the collect lock is acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCondition {
    Always,
    /// Skip when another caller refilled the pool while we waited
    WhenNoLiveProxy,
}

pub struct AcquisitionChain {
    file: FileSource,
    verify_file: bool,
    external: Option<ExternalProcessSource>,
    broker: Option<Arc<dyn ProxyBroker>>,
    discovery: DiscoveryConfig,
    collect_lock: Mutex<()>,
    verify_lock: Mutex<()>,
    /// Set once the first discovery attempt has completed
    initial_done: AtomicBool,
    runs: AtomicUsize,
}

impl AcquisitionChain {
    pub fn new(file: FileSource, discovery: DiscoveryConfig) -> Self {
        Self {
            file,
            verify_file: false,
            external: None,
            broker: None,
            discovery,
            collect_lock: Mutex::new(()),
            verify_lock: Mutex::new(()),
            initial_done: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let acq = &config.acquisition;
        let mut chain = Self::new(
            FileSource::new(acq.proxy_list_path.clone(), acq.inline_proxies.clone()),
            config.discovery.clone(),
        )
        .verify_file_proxies(acq.verify_file_proxies);

        if let Some(external) = ExternalProcessSource::from_config(&acq.external) {
            chain = chain.with_external(external);
        }
        if config.discovery.broker_enabled {
            chain = chain.with_broker(Arc::new(FeedBroker::from_config(&config.discovery)?));
        }
        Ok(chain)
    }

    pub fn with_external(mut self, external: ExternalProcessSource) -> Self {
        self.external = Some(external);
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn ProxyBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn verify_file_proxies(mut self, verify: bool) -> Self {
        self.verify_file = verify;
        self
    }

    /// Number of runs that got past the collect lock and its condition
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Count limit for the next discovery attempt
    pub fn discovery_limit(&self) -> usize {
        if self.initial_done.load(Ordering::SeqCst) {
            self.discovery.periodic_count
        } else {
            self.discovery.initial_count
        }
    }

    /// Run the chain and merge its results into `pool`
    ///
    /// The collect lock is held for the whole run, including the merge, so a
    /// caller queued behind it observes the refilled pool.
    #[instrument(skip(self, pool))]
    pub async fn run(&self, plan: RefreshPlan, pool: &ProxyPool, condition: RunCondition) -> RefreshReport {
        let _collect = self.collect_lock.lock().await;

        if condition == RunCondition::WhenNoLiveProxy && pool.select_live().is_some() {
            debug!("Pool was refilled while waiting, skipping acquisition");
            return RefreshReport::skipped();
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        let mut report = RefreshReport::default();

        if plan.read_file {
            report.proxies = self.read_file(&mut report.jobs).await;
            report.added = pool.add_all(report.proxies.iter().cloned());
        }
        // A list that only repeats known proxies does not count as a refill
        if plan.discover && report.added == 0 {
            let found = self.discover(&mut report.jobs).await;
            report.added += pool.add_all(found.iter().cloned());
            for proxy in found {
                if !report.proxies.contains(&proxy) {
                    report.proxies.push(proxy);
                }
            }
        }

        info!(
            sources = ?report.sources(),
            found = report.proxies.len(),
            added = report.added,
            "Acquisition run finished"
        );
        report
    }

    /// Submit `candidates` to the broker in check mode, keeping the
    /// reachable subset
    ///
    /// Without a broker the list is returned unchanged.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn verify(&self, candidates: Vec<Proxy>) -> Result<Vec<Proxy>> {
        let Some(broker) = &self.broker else {
            warn!("No broker configured, proxies are used unverified");
            return Ok(candidates);
        };

        let _verify = self.verify_lock.lock().await;
        let query = DiscoveryQuery::from_config(&self.discovery, 0);
        let (tx, rx) = mpsc::channel(BROKER_QUEUE_CAPACITY);
        let (result, alive) = tokio::join!(broker.check(candidates, &query, tx), drain(rx, 0));
        result.map(|_| alive)
    }

    async fn read_file(&self, jobs: &mut Vec<RefreshJob>) -> Vec<Proxy> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let (source, result) = match self.file.load().await {
            Ok((source, list)) => (source, Ok(list)),
            Err(e) => (RefreshSource::File, Err(e)),
        };
        let proxies = record(jobs, source, result, started_at, timer);

        if self.verify_file && !proxies.is_empty() {
            let started_at = Utc::now();
            let timer = Instant::now();
            let result = self.verify(proxies).await;
            return record(jobs, RefreshSource::Verify, result, started_at, timer);
        }
        proxies
    }

    async fn discover(&self, jobs: &mut Vec<RefreshJob>) -> Vec<Proxy> {
        if self.external.is_none() && self.broker.is_none() {
            return Vec::new();
        }

        let limit = self.discovery_limit();
        let query = DiscoveryQuery::from_config(&self.discovery, limit);
        let mut proxies = Vec::new();

        if let Some(external) = &self.external {
            let started_at = Utc::now();
            let timer = Instant::now();
            let result = external.collect(limit, &query.settings()).await;
            proxies = record(jobs, RefreshSource::External, result, started_at, timer);
        }

        if proxies.is_empty() {
            if let Some(broker) = &self.broker {
                let started_at = Utc::now();
                let timer = Instant::now();
                let result = find_with(broker.as_ref(), &query).await;
                proxies = record(jobs, RefreshSource::Broker, result, started_at, timer);
            }
        }

        if !self.initial_done.swap(true, Ordering::SeqCst) {
            debug!(
                next_limit = self.discovery.periodic_count,
                "Initial discovery done, switching to periodic count"
            );
        }
        proxies
    }
}

/// Log and record a source attempt, converting errors to an empty list
fn record(
    jobs: &mut Vec<RefreshJob>,
    source: RefreshSource,
    result: Result<Vec<Proxy>>,
    started_at: chrono::DateTime<Utc>,
    timer: Instant,
) -> Vec<Proxy> {
    let job = RefreshJob::new(source, &result, started_at, timer.elapsed());
    debug!(job_id = %job.id, source = %source, produced = job.produced, "Source finished");
    jobs.push(job);

    match result {
        Ok(list) => list,
        Err(e) => {
            warn!(source = %source, error = %e, "Proxy source failed");
            Vec::new()
        }
    }
}

/// Drive a broker discovery while draining its queue
///
/// A failed discovery discards whatever was streamed before the error.
async fn find_with(broker: &dyn ProxyBroker, query: &DiscoveryQuery) -> Result<Vec<Proxy>> {
    let (tx, rx) = mpsc::channel(BROKER_QUEUE_CAPACITY);
    let (result, found) = tokio::join!(broker.find(query, tx), drain(rx, query.limit));
    debug!(broker = broker.name(), found = found.len(), "Broker discovery finished");
    result.map(|_| found)
}

/// Consume the queue until the `None` sentinel (or a closed channel),
/// deduplicating and keeping at most `limit` entries (0 = unbounded)
async fn drain(mut rx: mpsc::Receiver<Option<Proxy>>, limit: usize) -> Vec<Proxy> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    while let Some(Some(proxy)) = rx.recv().await {
        if limit > 0 && out.len() >= limit {
            continue;
        }
        if seen.insert(proxy.clone()) {
            out.push(proxy);
        }
    }
    out
}
