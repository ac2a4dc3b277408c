//! Background services

pub mod pool_stats;
pub mod refresher;

pub use pool_stats::PoolStatsReporter;
pub use refresher::{PeriodicRefresher, RefresherHandle};
