//! Per-request proxy rotation
//!
//! The controller attaches a live proxy, its download slot and a user-agent
//! to each outgoing request, escalates through replenishment when the pool
//! runs dry, and feeds request outcomes back into the pool.

mod outcome;

pub use outcome::RequestOutcome;

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::acquisition::RefreshPlan;
use crate::config::Config;
use crate::coordinator::PoolCoordinator;
use crate::error::{Result, ReelError};
use crate::models::{HostPort, Proxy, ProxyCondition};

/// Rotation-relevant request metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub proxy: Option<Proxy>,
    /// Download slot shared by every request through the same egress
    pub slot: Option<HostPort>,
    pub user_agent: Option<String>,
    /// The proxy was assigned by the controller
    pub managed: bool,
}

impl RequestMeta {
    /// A request with an explicit proxy the controller must leave alone
    pub fn with_proxy(proxy: Proxy) -> Self {
        Self {
            proxy: Some(proxy),
            ..Default::default()
        }
    }
}

/// What the controller did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Explicit proxy, untouched
    PassThrough,
    Proxied(Proxy),
    /// No proxy available, the request goes out directly
    Direct,
}

#[derive(Debug, Clone, Copy)]
pub struct RotationSettings {
    pub stop_if_no_proxies: bool,
    pub use_random_ua: bool,
    pub sticky_ua: bool,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            stop_if_no_proxies: false,
            use_random_ua: true,
            sticky_ua: false,
        }
    }
}

impl RotationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stop_if_no_proxies: config.pool.stop_if_no_proxies,
            use_random_ua: config.user_agent.use_random,
            sticky_ua: config.user_agent.sticky_per_proxy,
        }
    }
}

pub struct RotationController {
    coordinator: Arc<PoolCoordinator>,
    settings: RotationSettings,
}

impl RotationController {
    pub fn new(coordinator: Arc<PoolCoordinator>, settings: RotationSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<PoolCoordinator> {
        &self.coordinator
    }

    /// Assign a proxy to the request described by `meta`
    ///
    /// Returns [`ReelError::NoProxiesAvailable`] when every source is
    /// exhausted and the crawl is configured to stop; the caller must treat
    /// it as terminal.
    pub async fn route(&self, meta: &mut RequestMeta) -> Result<Decision> {
        if meta.proxy.is_some() && !meta.managed {
            return Ok(Decision::PassThrough);
        }

        let Some(proxy) = self.acquire().await else {
            return self.exhausted(meta);
        };

        let pool = self.coordinator.pool();
        meta.slot = Some(pool.slot_for(&proxy));

        if self.settings.use_random_ua && (meta.managed || meta.user_agent.is_none()) {
            let ua = self
                .coordinator
                .user_agents()
                .assign(Some(&proxy), self.settings.sticky_ua);
            meta.user_agent = Some(ua);
        }

        meta.proxy = Some(proxy.clone());
        meta.managed = true;
        debug!(proxy = %proxy, "Proxy assigned to request");
        Ok(Decision::Proxied(proxy))
    }

    /// Feed the outcome of a managed request back into the pool
    pub fn report(&self, meta: &RequestMeta, outcome: RequestOutcome) {
        if !meta.managed {
            return;
        }
        let Some(proxy) = &meta.proxy else {
            return;
        };

        let pool = self.coordinator.pool();
        if outcome.is_failure() {
            debug!(proxy = %proxy, outcome = ?outcome, "Request through proxy failed");
            if pool.record_failure(proxy) == Some(ProxyCondition::Dead) {
                self.coordinator.user_agents().forget(proxy);
            }
        } else {
            pool.record_success(proxy);
        }
    }

    /// Select a live proxy, escalating file-only then full replenishment
    ///
    /// Pinned user-agents are dropped whenever the exhausted pool is rebuilt.
    #[instrument(skip(self))]
    async fn acquire(&self) -> Option<Proxy> {
        let pool = self.coordinator.pool();
        if let Some(proxy) = pool.select_live() {
            return Some(proxy);
        }

        let proxy = self.escalate().await;
        if proxy.is_some() {
            debug!("Pool rebuilt, resetting pinned user-agents");
            self.coordinator.user_agents().reset();
        }
        proxy
    }

    async fn escalate(&self) -> Option<Proxy> {
        let pool = self.coordinator.pool();

        info!(stats = %pool.stats(), "No live proxies, reloading proxy list");
        self.coordinator.replenish(RefreshPlan::FILE_ONLY, true).await;
        if let Some(proxy) = pool.select_live() {
            return Some(proxy);
        }

        warn!("Proxy list yielded nothing usable, forcing a full acquisition run");
        self.coordinator.replenish(RefreshPlan::FULL, true).await;
        pool.select_live()
    }

    fn exhausted(&self, meta: &mut RequestMeta) -> Result<Decision> {
        if self.settings.stop_if_no_proxies {
            error!(stats = %self.coordinator.pool().stats(), "No proxies available, stopping");
            return Err(ReelError::NoProxiesAvailable);
        }

        warn!("No proxies available, sending request without a proxy");
        meta.proxy = None;
        meta.slot = None;
        meta.managed = false;
        Ok(Decision::Direct)
    }
}
