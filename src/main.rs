//! proxyreel - entry point
//!
//! Without arguments the pool is seeded and kept fresh until Ctrl+C/SIGTERM.
//! With URL arguments each URL is fetched once through the rotating pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use proxyreel::acquisition::http;
use proxyreel::config::LogConfig;
use proxyreel::proxy::{Decision, RequestMeta, RequestOutcome, RotationController, RotationSettings};
use proxyreel::services::{PeriodicRefresher, PoolStatsReporter};
use proxyreel::{Config, PoolCoordinator};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.log);

    info!("Starting proxyreel");

    let coordinator = Arc::new(PoolCoordinator::from_config(&config)?);
    coordinator.seed().await;

    let refresher = config
        .collection_interval()
        .and_then(|period| PeriodicRefresher::for_coordinator(coordinator.clone(), period, false));
    let stats = PoolStatsReporter::new(coordinator.pool().clone())
        .start(Duration::from_secs(config.pool.logstats_interval_secs));

    let targets: Vec<String> = std::env::args().skip(1).collect();
    let result = if targets.is_empty() {
        shutdown_signal().await;
        info!("Shutdown signal received");
        Ok(())
    } else {
        let controller = RotationController::new(
            coordinator.clone(),
            RotationSettings::from_config(&config),
        );
        fetch_all(&controller, &targets, config.pool.max_failures_before_dead).await
    };

    if let Some(handle) = &refresher {
        handle.stop();
    }
    if let Some(handle) = &stats {
        handle.stop();
    }

    info!(stats = %coordinator.pool().stats(), "proxyreel stopped");
    result
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyreel={}", log.level).into());

    let (json, pretty) = if log.format.eq_ignore_ascii_case("json") {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

/// Fetch every target through the pool, retrying failed attempts on
/// another proxy
async fn fetch_all(controller: &RotationController, targets: &[String], retries: u32) -> anyhow::Result<()> {
    for raw in targets {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %raw, error = %e, "Skipping invalid URL");
                continue;
            }
        };

        let mut meta = RequestMeta::default();
        for attempt in 1..=retries.max(1) {
            let decision = controller
                .route(&mut meta)
                .await
                .context("no proxies available")?;
            let via = match &decision {
                Decision::Proxied(proxy) => Some(proxy),
                Decision::Direct | Decision::PassThrough => meta.proxy.as_ref(),
            };

            let result = http::get_as(&url, via, meta.user_agent.as_deref(), FETCH_TIMEOUT).await;
            let outcome = match &result {
                Ok(resp) => RequestOutcome::from_response(resp.status, resp.body.len()),
                Err(e) => RequestOutcome::from_error(e),
            };
            controller.report(&meta, outcome);

            match result {
                Ok(resp) if !outcome.is_failure() => {
                    info!(url = %url, status = %resp.status, bytes = resp.body.len(), attempt, "Fetched");
                    break;
                }
                Ok(resp) => warn!(url = %url, status = %resp.status, attempt, "Response looks like a ban"),
                Err(e) => warn!(url = %url, error = %e, attempt, "Fetch failed"),
            }
            if attempt == retries.max(1) {
                error!(url = %url, "Giving up");
            }
        }
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
