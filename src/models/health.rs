use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Where a proxy currently stands in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyCondition {
    /// Collected but never used
    Unchecked,
    Live,
    BackingOff,
    /// Permanently excluded
    Dead,
}

impl ProxyCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyCondition::Unchecked => "unchecked",
            ProxyCondition::Live => "live",
            ProxyCondition::BackingOff => "backing_off",
            ProxyCondition::Dead => "dead",
        }
    }

    /// Whether `select_live` may hand this proxy out
    pub fn is_selectable(&self) -> bool {
        matches!(self, ProxyCondition::Live | ProxyCondition::Unchecked)
    }
}

impl std::fmt::Display for ProxyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backoff parameters shared by every proxy of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// A proxy dies once its consecutive failures exceed this ceiling
    pub max_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(3600),
            max_failures: 20,
        }
    }
}

impl BackoffPolicy {
    /// Delay applied after the `failures`-th consecutive failure (1-based):
    /// `min(base * 2^(failures - 1), cap)`
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }
}

/// Failure and backoff bookkeeping attached 1:1 to a pooled proxy
#[derive(Debug, Clone)]
pub struct HealthState {
    pub failure_count: u32,
    pub backoff_until: Instant,
    pub dead: bool,
    pub unchecked: bool,
}

impl HealthState {
    pub fn new(now: Instant) -> Self {
        Self {
            failure_count: 0,
            backoff_until: now,
            dead: false,
            unchecked: true,
        }
    }

    pub fn condition(&self, now: Instant) -> ProxyCondition {
        if self.dead {
            ProxyCondition::Dead
        } else if now < self.backoff_until {
            ProxyCondition::BackingOff
        } else if self.unchecked {
            ProxyCondition::Unchecked
        } else {
            ProxyCondition::Live
        }
    }

    /// Apply one failure; `backoff_until` never moves backwards
    pub fn fail(&mut self, policy: &BackoffPolicy, now: Instant) -> ProxyCondition {
        self.unchecked = false;
        self.failure_count = self.failure_count.saturating_add(1);

        let until = now + policy.delay_for(self.failure_count);
        if until > self.backoff_until {
            self.backoff_until = until;
        }

        if self.failure_count > policy.max_failures {
            self.dead = true;
        }

        self.condition(now)
    }

    pub fn succeed(&mut self, now: Instant) {
        self.unchecked = false;
        self.failure_count = 0;
        self.backoff_until = now;
    }

    /// Time left in the current backoff window
    pub fn remaining_backoff(&self, now: Instant) -> Duration {
        self.backoff_until.saturating_duration_since(now)
    }
}
