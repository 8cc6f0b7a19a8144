//! Risk Dashboard Monitor
//!
//! Runs a dashboard session against the simulated backend and logs every
//! snapshot change until interrupted.

use std::sync::Arc;
use std::time::Duration;

use riskdash_core::DashboardError;
use riskdash_services::{
    DashboardConfig, DashboardSession, EventBus, ExpiringCache, RandomizedStrategy,
    SessionUpdate, SharedClock, SimulatedBackend, SourceGateway, SystemClock,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Attempts at the initial load before giving up
const MAX_START_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,riskdash_services=debug")),
        )
        .init();

    let config = DashboardConfig::from_env()?;
    info!(
        "Starting risk dashboard monitor for portfolio {}",
        config.portfolio_id
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let strategy = Arc::new(
        RandomizedStrategy::new(config.connected_probability)
            .with_failure_rate(config.simulated_failure_rate),
    );
    let backend = Arc::new(SimulatedBackend::new(strategy, clock.clone()));
    let gateway = Arc::new(SourceGateway::from_backend(
        backend,
        ExpiringCache::new(clock.clone()),
        config.cache.metrics_ttl(),
    ));
    let bus = Arc::new(EventBus::new());

    let session = Arc::new(DashboardSession::new(config, gateway, bus, clock));

    // Forward session updates to the log
    let mut updates = session.subscribe();
    let log_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => log_update(&update),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Update log lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    start_with_retry(&session).await?;

    if let Some(snapshot) = session.snapshot() {
        info!(
            "Portfolio value {:.2}, VaR95 {:.2}, {} alerts, {} breakdown entries",
            snapshot.metrics.portfolio_value,
            snapshot.metrics.var_95,
            snapshot.alerts.len(),
            snapshot.breakdown.len()
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    session.shutdown();
    log_task.abort();

    Ok(())
}

async fn start_with_retry(session: &DashboardSession) -> anyhow::Result<()> {
    match session.start().await {
        Ok(()) => return Ok(()),
        Err(e) => error!("Initial load failed: {}", e),
    }

    for attempt in 2..=MAX_START_ATTEMPTS {
        let backoff = Duration::from_secs(2 * u64::from(attempt - 1));
        warn!("Retrying initial load in {:?} (attempt {})", backoff, attempt);
        tokio::time::sleep(backoff).await;

        match session.retry().await {
            Ok(()) => return Ok(()),
            Err(e @ DashboardError::InvalidState(_)) => return Err(e.into()),
            Err(e) => error!("Initial load failed: {}", e),
        }
    }

    anyhow::bail!(
        "initial load failed after {} attempts",
        MAX_START_ATTEMPTS
    )
}

fn log_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::State(state) => info!("Session state: {}", state),
        SessionUpdate::Connection(connection) => info!("Connection: {}", connection),
        SessionUpdate::AlertAdded(alert) => warn!(
            "Alert [{:?}] {} ({})",
            alert.severity,
            alert.message,
            alert.metric.as_deref().unwrap_or("-")
        ),
        SessionUpdate::HealthReplaced { unreachable } if *unreachable > 0 => {
            warn!("Health check: {} services unreachable", unreachable)
        }
        other => debug!("Update: {:?}", other),
    }
}
