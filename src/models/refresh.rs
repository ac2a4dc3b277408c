use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Proxy;

/// Source a refresh job pulled candidates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshSource {
    File,
    Inline,
    External,
    Broker,
    Verify,
}

impl RefreshSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshSource::File => "file",
            RefreshSource::Inline => "inline",
            RefreshSource::External => "external",
            RefreshSource::Broker => "broker",
            RefreshSource::Verify => "verify",
        }
    }
}

impl std::fmt::Display for RefreshSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum RefreshOutcome {
    Success,
    Empty,
    Error(String),
}

/// One source attempt within an acquisition chain run
#[derive(Debug, Clone, Serialize)]
pub struct RefreshJob {
    pub id: Uuid,
    pub source: RefreshSource,
    pub produced: usize,
    pub outcome: RefreshOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RefreshJob {
    pub fn new(
        source: RefreshSource,
        result: &crate::error::Result<Vec<Proxy>>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let (produced, outcome) = match result {
            Ok(list) if list.is_empty() => (0, RefreshOutcome::Empty),
            Ok(list) => (list.len(), RefreshOutcome::Success),
            Err(e) => (0, RefreshOutcome::Error(e.to_string())),
        };

        Self {
            id: Uuid::new_v4(),
            source,
            produced,
            outcome,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Everything one acquisition chain run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub jobs: Vec<RefreshJob>,
    pub proxies: Vec<Proxy>,
    /// Proxies actually inserted into the pool by the merge step
    pub added: usize,
    /// The run was skipped because another caller already refilled the pool
    pub skipped: bool,
}

impl RefreshReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    pub fn sources(&self) -> Vec<RefreshSource> {
        self.jobs.iter().map(|j| j.source).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReelError;

    #[test]
    fn test_job_outcome_from_result() {
        let now = Utc::now();
        let ok: crate::error::Result<Vec<Proxy>> =
            Ok(vec![Proxy::parse("1.2.3.4:80").unwrap()]);
        let job = RefreshJob::new(RefreshSource::File, &ok, now, Duration::from_millis(5));
        assert_eq!(job.produced, 1);
        assert_eq!(job.outcome, RefreshOutcome::Success);
        assert_eq!(job.elapsed_ms, 5);

        let empty: crate::error::Result<Vec<Proxy>> = Ok(Vec::new());
        let job = RefreshJob::new(RefreshSource::Broker, &empty, now, Duration::ZERO);
        assert_eq!(job.outcome, RefreshOutcome::Empty);

        let err: crate::error::Result<Vec<Proxy>> = Err(ReelError::Timeout);
        let job = RefreshJob::new(RefreshSource::External, &err, now, Duration::ZERO);
        assert_eq!(job.produced, 0);
        assert!(matches!(job.outcome, RefreshOutcome::Error(_)));
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(RefreshOutcome::Error("boom".into())).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "boom");
    }
}
