//! Proxy pool, rotation and user-agent assignment
//!
//! - [`pool::ProxyPool`]: proxies with failure/backoff health tracking
//! - [`rotation::RotationController`]: per-request assignment and outcome reporting
//! - [`user_agent::UserAgentAssigner`]: weighted, optionally sticky user-agents

pub mod pool;
pub mod rotation;
pub mod user_agent;

pub use pool::{PoolStats, ProxyPool};
pub use rotation::{Decision, RequestMeta, RequestOutcome, RotationController, RotationSettings};
pub use user_agent::{UaCategory, UserAgentAssigner};
