//! End-to-end session tests over the randomized simulated backend

use std::sync::Arc;
use std::time::Duration;

use riskdash_core::{ConnectionState, MARKET_DATA_TOPIC};
use riskdash_services::{
    metrics_cache_key, DashboardConfig, DashboardSession, EventBus, ExpiringCache,
    RandomizedStrategy, SessionState, SessionUpdate, SharedClock, SimulatedBackend,
    SourceGateway, TokioClock,
};
use tokio_test::assert_ok;

fn shared_gateway(clock: SharedClock, seed: u64) -> Arc<SourceGateway> {
    let backend = Arc::new(SimulatedBackend::new(
        Arc::new(RandomizedStrategy::seeded(seed, 1.0)),
        clock.clone(),
    ));
    Arc::new(SourceGateway::from_backend(
        backend,
        ExpiringCache::new(clock),
        Duration::from_secs(3),
    ))
}

fn live_config(portfolio_id: &str) -> DashboardConfig {
    let mut config = DashboardConfig::default();
    config.portfolio_id = portfolio_id.to_string();
    config.live_feed.alert_every = 5;
    config
}

#[tokio::test(start_paused = true)]
async fn test_live_session_end_to_end() {
    let clock: SharedClock = Arc::new(TokioClock::new());
    let bus = Arc::new(EventBus::new());
    let session = DashboardSession::new(
        live_config("growth"),
        shared_gateway(clock.clone(), 7),
        Arc::clone(&bus),
        clock,
    );
    let mut updates = session.subscribe();

    assert_ok!(session.start().await);
    assert_eq!(session.state(), SessionState::Ready);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.portfolio_id, "growth");
    assert!(snapshot.alerts.len() > 3);
    assert!(snapshot.alerts.len() <= 10);
    assert!(snapshot.health.all_reachable());
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    let mut patched = 0;
    let mut alerts = 0;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::MetricsPatched => patched += 1,
            SessionUpdate::AlertAdded(_) => alerts += 1,
            _ => {}
        }
    }
    assert!(patched > 0);
    assert!(alerts > 0);

    session.shutdown();
    assert_eq!(bus.subscriber_count(MARKET_DATA_TOPIC), 0);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_share_gateway_independently() {
    let clock: SharedClock = Arc::new(TokioClock::new());
    let gateway = shared_gateway(clock.clone(), 11);

    let mut growth_config = live_config("growth");
    growth_config.live_feed.enabled = false;
    let mut income_config = live_config("income");
    income_config.live_feed.enabled = false;

    let growth = DashboardSession::new(
        growth_config,
        Arc::clone(&gateway),
        Arc::new(EventBus::new()),
        clock.clone(),
    );
    let income = DashboardSession::new(
        income_config,
        Arc::clone(&gateway),
        Arc::new(EventBus::new()),
        clock,
    );

    let (a, b) = tokio::join!(growth.start(), income.start());
    assert_ok!(a);
    assert_ok!(b);

    assert!(gateway.cache().fetch(&metrics_cache_key("growth")).is_some());
    assert!(gateway.cache().fetch(&metrics_cache_key("income")).is_some());

    growth.shutdown();
    assert_eq!(growth.state(), SessionState::Stopped);
    assert_eq!(income.state(), SessionState::Ready);
}
