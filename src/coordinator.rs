//! Shared pool, acquisition chain and user-agent state
//!
//! One coordinator is built per crawl and handed to the rotation controller
//! and the periodic refresher.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::acquisition::{AcquisitionChain, RefreshPlan, RunCondition};
use crate::config::Config;
use crate::error::Result;
use crate::models::RefreshReport;
use crate::proxy::pool::ProxyPool;
use crate::proxy::user_agent::UserAgentAssigner;

pub struct PoolCoordinator {
    pool: Arc<ProxyPool>,
    chain: AcquisitionChain,
    user_agents: UserAgentAssigner,
}

impl PoolCoordinator {
    pub fn new(pool: Arc<ProxyPool>, chain: AcquisitionChain, user_agents: UserAgentAssigner) -> Self {
        Self {
            pool,
            chain,
            user_agents,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let pool = Arc::new(ProxyPool::new(config.backoff_policy()));
        let chain = AcquisitionChain::from_config(config)?;
        let user_agents = UserAgentAssigner::new(
            config.user_agent.category,
            config.user_agent.fallback.clone(),
        );
        Ok(Self::new(pool, chain, user_agents))
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn chain(&self) -> &AcquisitionChain {
        &self.chain
    }

    pub fn user_agents(&self) -> &UserAgentAssigner {
        &self.user_agents
    }

    /// Run the acquisition chain and merge the results into the pool
    ///
    /// With `only_if_exhausted` the run is skipped when a live proxy shows up
    /// while waiting for the collect lock.
    pub async fn replenish(&self, plan: RefreshPlan, only_if_exhausted: bool) -> RefreshReport {
        let condition = if only_if_exhausted {
            RunCondition::WhenNoLiveProxy
        } else {
            RunCondition::Always
        };
        self.chain.run(plan, &self.pool, condition).await
    }

    /// Acquisition runs performed so far
    pub fn runs(&self) -> usize {
        self.chain.runs()
    }

    /// Build the initial pool: file or inline list first, discovery otherwise
    #[instrument(skip(self))]
    pub async fn seed(&self) -> RefreshReport {
        let report = self.replenish(RefreshPlan::FULL, false).await;
        if self.pool.is_empty() {
            warn!("Proxy pool is empty after seeding");
        } else {
            info!(stats = %self.pool.stats(), "Proxy pool seeded");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::FileSource;
    use crate::models::{BackoffPolicy, Proxy};

    fn coordinator(inline: &[&str]) -> PoolCoordinator {
        let chain = AcquisitionChain::new(
            FileSource::new(None, inline.iter().map(|s| s.to_string()).collect()),
            Config::default().discovery,
        );
        PoolCoordinator::new(
            Arc::new(ProxyPool::new(BackoffPolicy::default())),
            chain,
            UserAgentAssigner::default(),
        )
    }

    #[tokio::test]
    async fn test_seed_fills_pool() {
        let coordinator = coordinator(&["1.1.1.1:80", "2.2.2.2:80"]);
        let report = coordinator.seed().await;

        assert_eq!(report.added, 2);
        assert_eq!(coordinator.pool().len(), 2);
        assert_eq!(coordinator.runs(), 1);
    }

    #[tokio::test]
    async fn test_replenish_only_if_exhausted_skips_live_pool() {
        let coordinator = coordinator(&["1.1.1.1:80"]);
        coordinator.pool().add(Proxy::parse("9.9.9.9:80").unwrap());

        let report = coordinator.replenish(RefreshPlan::FILE_ONLY, true).await;
        assert!(report.skipped);
        assert_eq!(coordinator.runs(), 0);

        let report = coordinator.replenish(RefreshPlan::FILE_ONLY, false).await;
        assert!(!report.skipped);
        assert_eq!(coordinator.pool().len(), 2);
    }

    #[test]
    fn test_from_config_defaults() {
        let coordinator = PoolCoordinator::from_config(&Config::default()).unwrap();
        assert!(coordinator.pool().is_empty());
        assert_eq!(coordinator.pool().policy().max_failures, 20);
    }
}
