//! In-memory proxy pool with health tracking
//!
//! Every pooled proxy carries a [`HealthState`]. Selection is uniform random
//! over the entries that are neither dead nor inside a backoff window.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::{BackoffPolicy, HealthState, HostPort, Proxy, ProxyCondition};

#[derive(Debug, Default)]
struct PoolState {
    proxies: HashMap<Proxy, HealthState>,
    /// Slot index; only non-dead proxies appear here
    by_host_port: HashMap<HostPort, Proxy>,
}

impl PoolState {
    fn insert(&mut self, proxy: Proxy, now: Instant) -> bool {
        if self.proxies.contains_key(&proxy) {
            return false;
        }
        self.by_host_port.insert(proxy.host_port(), proxy.clone());
        self.proxies.insert(proxy, HealthState::new(now));
        true
    }

    /// Drop `proxy` from the slot index, handing the slot to another
    /// non-dead proxy on the same egress if there is one
    fn unindex(&mut self, proxy: &Proxy) {
        let key = proxy.host_port();
        if self.by_host_port.get(&key) != Some(proxy) {
            return;
        }
        self.by_host_port.remove(&key);

        let replacement = self
            .proxies
            .iter()
            .find(|(p, state)| *p != proxy && !state.dead && p.host_port() == key)
            .map(|(p, _)| p.clone());
        if let Some(other) = replacement {
            self.by_host_port.insert(key, other);
        }
    }
}

/// Snapshot of pool composition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub live: usize,
    pub unchecked: usize,
    pub backing_off: usize,
    pub dead: usize,
    /// Mean remaining backoff across proxies currently backing off
    pub mean_backoff_secs: f64,
}

impl PoolStats {
    pub fn selectable(&self) -> usize {
        self.live + self.unchecked
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Proxies(good: {}, unchecked: {}, backing off: {}, dead: {}, mean backoff: {:.0}s)",
            self.live, self.unchecked, self.backing_off, self.dead, self.mean_backoff_secs
        )
    }
}

/// The set of known proxies and their health
pub struct ProxyPool {
    state: RwLock<PoolState>,
    policy: BackoffPolicy,
}

impl ProxyPool {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            policy,
        }
    }

    /// Build a pool pre-populated with `seed`
    pub fn with_proxies<I>(policy: BackoffPolicy, seed: I) -> Self
    where
        I: IntoIterator<Item = Proxy>,
    {
        let pool = Self::new(policy);
        pool.add_all(seed);
        pool
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Pick a random proxy that is neither dead nor backing off
    ///
    /// `None` is a replenishment signal, not an error.
    pub fn select_live(&self) -> Option<Proxy> {
        let now = Instant::now();
        let state = self.state.read();

        let eligible: Vec<&Proxy> = state
            .proxies
            .iter()
            .filter(|(_, health)| health.condition(now).is_selectable())
            .map(|(proxy, _)| proxy)
            .collect();

        let mut rng = rand::thread_rng();
        eligible.choose(&mut rng).map(|p| (*p).clone())
    }

    /// Insert `proxy` with a fresh health state; false if already known
    pub fn add(&self, proxy: Proxy) -> bool {
        let inserted = self.state.write().insert(proxy.clone(), Instant::now());
        if inserted {
            debug!(proxy = %proxy, "Proxy added to pool");
        } else {
            warn!(proxy = %proxy, "Proxy is already in the pool");
        }
        inserted
    }

    /// Merge a batch under one write lock; returns how many were new
    pub fn add_all<I>(&self, proxies: I) -> usize
    where
        I: IntoIterator<Item = Proxy>,
    {
        let now = Instant::now();
        let mut state = self.state.write();
        let mut added = 0;
        let mut duplicates = 0;
        for proxy in proxies {
            if state.insert(proxy, now) {
                added += 1;
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            debug!(added, duplicates, "Skipped proxies already in the pool");
        }
        added
    }

    /// Register a failed attempt through `proxy`
    ///
    /// Returns the resulting condition, or `None` for an unknown proxy.
    pub fn record_failure(&self, proxy: &Proxy) -> Option<ProxyCondition> {
        let now = Instant::now();
        let mut state = self.state.write();

        let health = state.proxies.get_mut(proxy)?;
        let was_dead = health.dead;
        let condition = health.fail(&self.policy, now);
        let failures = health.failure_count;
        let backoff = health.remaining_backoff(now);

        if condition == ProxyCondition::Dead && !was_dead {
            state.unindex(proxy);
            warn!(proxy = %proxy, failures, "Proxy marked dead");
        } else {
            debug!(
                proxy = %proxy,
                failures,
                backoff_secs = backoff.as_secs(),
                "Proxy backing off"
            );
        }

        Some(condition)
    }

    /// Register a successful attempt through `proxy`
    pub fn record_success(&self, proxy: &Proxy) -> bool {
        let now = Instant::now();
        let mut state = self.state.write();
        match state.proxies.get_mut(proxy) {
            Some(health) if !health.dead => {
                health.succeed(now);
                true
            }
            _ => false,
        }
    }

    /// Remove `proxy` entirely
    pub fn remove(&self, proxy: &Proxy) -> bool {
        let mut state = self.state.write();
        state.unindex(proxy);
        state.proxies.remove(proxy).is_some()
    }

    /// Download slot for `proxy`
    pub fn slot_for(&self, proxy: &Proxy) -> HostPort {
        proxy.host_port()
    }

    /// Proxy currently owning the slot `key`
    pub fn proxy_for_slot(&self, key: &HostPort) -> Option<Proxy> {
        self.state.read().by_host_port.get(key).cloned()
    }

    pub fn condition(&self, proxy: &Proxy) -> Option<ProxyCondition> {
        let now = Instant::now();
        self.state
            .read()
            .proxies
            .get(proxy)
            .map(|health| health.condition(now))
    }

    pub fn health(&self, proxy: &Proxy) -> Option<HealthState> {
        self.state.read().proxies.get(proxy).cloned()
    }

    pub fn contains(&self, proxy: &Proxy) -> bool {
        self.state.read().proxies.contains_key(proxy)
    }

    pub fn len(&self) -> usize {
        self.state.read().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().proxies.is_empty()
    }

    /// True when nothing could ever be selected again without new proxies:
    /// the pool is empty or every entry is dead. A pool whose entries are all
    /// backing off is not exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.state.read().proxies.values().all(|h| h.dead)
    }

    /// Earliest moment a backing-off proxy becomes selectable again
    pub fn next_recovery(&self) -> Option<Duration> {
        let now = Instant::now();
        self.state
            .read()
            .proxies
            .values()
            .filter(|h| !h.dead && h.condition(now) == ProxyCondition::BackingOff)
            .map(|h| h.remaining_backoff(now))
            .min()
    }

    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let state = self.state.read();

        let mut stats = PoolStats {
            total: state.proxies.len(),
            ..Default::default()
        };
        let mut backoff_total = 0.0;

        for health in state.proxies.values() {
            match health.condition(now) {
                ProxyCondition::Live => stats.live += 1,
                ProxyCondition::Unchecked => stats.unchecked += 1,
                ProxyCondition::Dead => stats.dead += 1,
                ProxyCondition::BackingOff => {
                    stats.backing_off += 1;
                    backoff_total += health.remaining_backoff(now).as_secs_f64();
                }
            }
        }

        if stats.backing_off > 0 {
            stats.mean_backoff_secs = backoff_total / stats.backing_off as f64;
        }

        stats
    }
}
