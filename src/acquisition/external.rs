//! Out-of-process discovery helper
//!
//! The helper is invoked as `[interpreter] program --path <out> --limit <n>
//! --settings <json>` and writes one proxy per line to `<out>`. The output
//! file is read and deleted after every attempt.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::broker::DiscoverySettings;
use crate::config::ExternalProcessConfig;
use crate::error::{Result, ReelError};
use crate::models::{parse_proxy_list, Proxy};

#[derive(Debug, Clone)]
pub struct ExternalProcessSource {
    program: PathBuf,
    interpreter: Option<String>,
    output_path: PathBuf,
    timeout: Duration,
    max_attempts: u32,
    retry_pause: Duration,
}

impl ExternalProcessSource {
    pub fn new(program: PathBuf, output_path: PathBuf) -> Self {
        Self {
            program,
            interpreter: None,
            output_path,
            timeout: Duration::from_secs(1800),
            max_attempts: 2,
            retry_pause: Duration::from_secs(5),
        }
    }

    /// `None` when no helper program is configured
    pub fn from_config(config: &ExternalProcessConfig) -> Option<Self> {
        let program = config.path.clone()?;
        Some(Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            ..Self::new(program, config.output_path.clone())
        })
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Pause before attempt `n + 1` is `retry_pause * n`
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Run the helper until it yields proxies or attempts run out
    ///
    /// Returns the last error when every attempt failed, and an empty list
    /// when the last attempt succeeded without output.
    #[instrument(skip(self, settings), fields(program = %self.program.display()))]
    pub async fn collect(&self, limit: usize, settings: &DiscoverySettings) -> Result<Vec<Proxy>> {
        let settings = serde_json::to_string(settings)?;
        let mut last = Ok(Vec::new());

        for attempt in 1..=self.max_attempts {
            last = self.run_once(limit, &settings).await;
            match &last {
                Ok(proxies) if !proxies.is_empty() => {
                    info!(attempt, count = proxies.len(), "Discovery helper produced proxies");
                    return last;
                }
                Ok(_) => warn!(attempt, "Discovery helper produced no proxies"),
                Err(e) => warn!(attempt, error = %e, "Discovery helper failed"),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_pause * attempt).await;
            }
        }

        last
    }

    async fn run_once(&self, limit: usize, settings: &str) -> Result<Vec<Proxy>> {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.arg("--path")
            .arg(&self.output_path)
            .arg("--limit")
            .arg(limit.to_string())
            .arg("--settings")
            .arg(settings)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let status = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ReelError::ExternalProcess(format!(
                    "exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Ok(Err(e)) => Err(ReelError::ExternalProcess(format!("cannot spawn: {}", e))),
            Err(_) => Err(ReelError::ExternalProcessTimeout {
                secs: self.timeout.as_secs(),
            }),
        };

        let proxies = self.take_output().await;
        match status {
            Ok(()) => Ok(proxies),
            Err(e) if !proxies.is_empty() => {
                warn!(error = %e, count = proxies.len(), "Discovery helper failed but left results, using them");
                Ok(proxies)
            }
            Err(e) => Err(e),
        }
    }

    /// Read and delete the output file
    async fn take_output(&self) -> Vec<Proxy> {
        let content = match tokio::fs::read_to_string(&self.output_path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.output_path.display(), error = %e, "No helper output file");
                return Vec::new();
            }
        };

        if let Err(e) = tokio::fs::remove_file(&self.output_path).await {
            warn!(path = %self.output_path.display(), error = %e, "Cannot delete helper output file");
        }

        let (proxies, rejected) = parse_proxy_list(content.lines());
        if !rejected.is_empty() {
            warn!(count = rejected.len(), "Discovery helper wrote invalid entries");
        }
        proxies
    }
}
