//! proxyreel - rotating proxy pool for crawlers
//!
//! Keeps a pool of HTTP(S) forward proxies with per-proxy failure backoff,
//! assigns a live proxy and user-agent to every outgoing request, and
//! replenishes the pool from a proxy list file, an external discovery helper
//! or an in-process feed broker when it runs dry.
//!
//! ## Components
//!
//! - [`proxy::ProxyPool`]: health tracking and random live selection
//! - [`proxy::RotationController`]: per-request assignment and escalation
//! - [`acquisition::AcquisitionChain`]: file, external and broker sources
//! - [`coordinator::PoolCoordinator`]: the shared state handed to all of the above
//! - [`services::PeriodicRefresher`]: fixed-schedule background refresh

pub mod acquisition;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;

pub use config::Config;
pub use coordinator::PoolCoordinator;
pub use error::{ReelError, Result};
