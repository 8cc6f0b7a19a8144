//! Dashboard Session
//!
//! Aggregates the gateway's capabilities into one consistent [`Snapshot`]
//! and keeps it current: an all-or-nothing initial load, three independent
//! refresh loops, live-event reactions and an optional network jitter
//! simulation. Each loop degrades on its own; a failed cycle leaves the
//! previous value in place.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use riskdash_core::{
    push_bounded, Alert, ConnectionState, DashboardError, DashboardResult, DomainEvent,
    HealthRecord, InvokeResponse, PortfolioAnalysis, QueryDescriptor, RemoteFunction, Snapshot,
    MARKET_DATA_TOPIC, RISK_ALERTS_TOPIC, VAR_SERIES,
};

use crate::clock::SharedClock;
use crate::config::DashboardConfig;
use crate::event_bus::{EventBus, SubscriptionHandle};
use crate::gateway::SourceGateway;
use crate::live_feed::{LiveFeedConfig, LiveFeedGenerator, LiveFeedHandle};

/// Capacity of the session update channel
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of a dashboard session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Refreshing,
    /// Snapshot is live but the last probe round found unreachable services
    Degraded,
    /// Initial load failed; `retry` re-enters `Loading`
    Failed { message: String },
    Stopped,
}

impl SessionState {
    /// True while a snapshot is being served
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Refreshing | SessionState::Degraded
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Loading => write!(f, "loading"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Refreshing => write!(f, "refreshing"),
            SessionState::Degraded => write!(f, "degraded"),
            SessionState::Failed { message } => write!(f, "failed ({})", message),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Change notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(SessionState),
    /// A full load or manual refresh replaced the snapshot
    SnapshotReplaced,
    MetricsPatched,
    VarSeriesReplaced,
    HealthReplaced { unreachable: usize },
    AlertAdded(Alert),
    Connection(ConnectionState),
}

/// Shared state touched by loops and bus handlers
struct SessionInner {
    config: DashboardConfig,
    gateway: Arc<SourceGateway>,
    bus: Arc<EventBus>,
    clock: SharedClock,
    state: RwLock<SessionState>,
    snapshot: RwLock<Option<Snapshot>>,
    /// Coarse link flag driven only by the jitter simulation
    link_up: AtomicBool,
    link_drops: AtomicU64,
    rng: Mutex<StdRng>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionInner {
    fn emit(&self, update: SessionUpdate) {
        // No receivers is normal before the presentation layer attaches
        let _ = self.updates.send(update);
    }

    fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    fn set_state(&self, next: SessionState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            debug!("[Session] State {} -> {}", *state, next);
            *state = next.clone();
        }
        self.emit(SessionUpdate::State(next));
    }

    fn connection_state(&self) -> ConnectionState {
        if matches!(
            *self.state.read(),
            SessionState::Failed { .. } | SessionState::Stopped
        ) {
            return ConnectionState::Disconnected;
        }
        if !self.link_up.load(Ordering::SeqCst) {
            return ConnectionState::Disconnected;
        }

        let degraded = self
            .snapshot
            .read()
            .as_ref()
            .map(|s| s.health.unreachable().next().is_some())
            .unwrap_or(false);
        if degraded {
            ConnectionState::Degraded
        } else {
            ConnectionState::Connected
        }
    }

    fn emit_connection_if_changed(&self, before: ConnectionState) {
        let after = self.connection_state();
        if after != before {
            self.emit(SessionUpdate::Connection(after));
        }
    }

    /// Issue the five initial calls concurrently and assemble a snapshot
    ///
    /// Every call is awaited before any result is inspected; if any of them
    /// failed the whole load fails with `AggregateLoadFailure`.
    async fn load_snapshot(&self) -> DashboardResult<Snapshot> {
        let portfolio_id = self.config.portfolio_id.as_str();
        let variables = json!({
            "portfolioId": portfolio_id,
            "days": self.config.var_history_days,
        });
        let var_query = QueryDescriptor::var_history();
        let breakdown_query = QueryDescriptor::risk_breakdown();

        let (metrics, series, breakdown, alerts, analysis) = tokio::join!(
            self.gateway.fetch_metrics(portfolio_id),
            self.gateway.run_query(&var_query, &variables),
            self.gateway.run_query(&breakdown_query, &variables),
            self.gateway.invoke(
                RemoteFunction::AlertProcessor.name(),
                json!({ "portfolioId": portfolio_id }),
            ),
            self.gateway.invoke(
                RemoteFunction::PortfolioAnalyzer.name(),
                json!({ "portfolioId": portfolio_id }),
            ),
        );

        let failures: Vec<String> = [
            ("metrics", metrics.as_ref().err()),
            ("var history", series.as_ref().err()),
            ("risk breakdown", breakdown.as_ref().err()),
            ("alerts", alerts.as_ref().err()),
            ("portfolio analysis", analysis.as_ref().err()),
        ]
        .into_iter()
        .filter_map(|(name, err)| err.map(|e| format!("{}: {}", name, e)))
        .collect();

        if !failures.is_empty() {
            return Err(DashboardError::aggregate(failures.join("; ")));
        }

        let mut series_by_name = std::collections::BTreeMap::new();
        series_by_name.insert(
            VAR_SERIES.to_string(),
            series?.into_series().unwrap_or_default(),
        );

        let alerts = parse_alerts(alerts?, self.config.alert_cap)
            .map_err(|e| DashboardError::aggregate(format!("alerts: {}", e)))?;
        let analysis = parse_analysis(analysis?)
            .map_err(|e| DashboardError::aggregate(format!("portfolio analysis: {}", e)))?;

        Ok(Snapshot {
            portfolio_id: portfolio_id.to_string(),
            metrics: metrics?,
            series_by_name,
            alerts,
            breakdown: breakdown?.into_breakdown().unwrap_or_default(),
            analysis,
            health: HealthRecord::default(),
            fetched_at: self.clock.now(),
        })
    }

    /// Fast loop body: re-fetch metrics and patch them in place
    async fn refresh_metrics(&self) {
        match self.gateway.fetch_metrics(&self.config.portfolio_id).await {
            Ok(metrics) => {
                if let Some(snapshot) = self.snapshot.write().as_mut() {
                    snapshot.metrics = metrics;
                } else {
                    return;
                }
                self.emit(SessionUpdate::MetricsPatched);
            }
            Err(e) => log_cycle_failure("Metrics refresh", &e),
        }
    }

    /// Medium loop body: replace the VaR history series wholesale
    async fn refresh_var_series(&self) {
        let variables = json!({
            "portfolioId": self.config.portfolio_id,
            "days": self.config.var_history_days,
        });

        match self
            .gateway
            .run_query(&QueryDescriptor::var_history(), &variables)
            .await
        {
            Ok(result) => {
                let Some(points) = result.into_series() else {
                    warn!("[Session] VaR history query returned no series, skipping cycle");
                    return;
                };
                if let Some(snapshot) = self.snapshot.write().as_mut() {
                    snapshot.series_by_name.insert(VAR_SERIES.to_string(), points);
                } else {
                    return;
                }
                self.emit(SessionUpdate::VarSeriesReplaced);
            }
            Err(e) => log_cycle_failure("VaR history refresh", &e),
        }
    }

    /// Slow loop body: probe every service and replace health wholesale
    async fn refresh_health(&self) {
        let services = self.config.endpoints.services();
        let checks = self.gateway.probe_all(&services).await;
        let record = HealthRecord::from_checks(checks, self.clock.now());
        self.apply_health(record);
    }

    fn apply_health(&self, record: HealthRecord) {
        let unreachable: Vec<String> = record
            .unreachable()
            .map(|s| s.service_name.clone())
            .collect();
        let before = self.connection_state();

        if let Some(snapshot) = self.snapshot.write().as_mut() {
            snapshot.health = record;
        } else {
            return;
        }
        self.emit(SessionUpdate::HealthReplaced {
            unreachable: unreachable.len(),
        });

        let next = match self.state() {
            SessionState::Ready if !unreachable.is_empty() => Some(SessionState::Degraded),
            SessionState::Degraded if unreachable.is_empty() => Some(SessionState::Ready),
            _ => None,
        };
        if let Some(next) = next {
            if next == SessionState::Degraded {
                warn!("[Session] Degraded: unreachable services {:?}", unreachable);
            } else {
                info!("[Session] All services reachable again");
            }
            self.set_state(next);
        }

        self.emit_connection_if_changed(before);
    }

    /// After a manual refresh, return to Ready or Degraded per current health
    fn settle_after_refresh(&self) {
        if self.state() != SessionState::Refreshing {
            return;
        }
        let degraded = self
            .snapshot
            .read()
            .as_ref()
            .map(|s| s.health.unreachable().next().is_some())
            .unwrap_or(false);
        self.set_state(if degraded {
            SessionState::Degraded
        } else {
            SessionState::Ready
        });
    }

    /// Jitter loop body: maybe drop the link, then recover after a delay
    async fn jitter_link(&self) {
        if !self.link_up.load(Ordering::SeqCst) {
            return;
        }
        let stays_up = self
            .rng
            .lock()
            .random_bool(self.config.connected_probability.clamp(0.0, 1.0));
        if stays_up {
            return;
        }

        let recovery = self.config.intervals.jitter_recovery();
        let before = self.connection_state();
        self.link_up.store(false, Ordering::SeqCst);
        self.link_drops.fetch_add(1, Ordering::SeqCst);
        warn!(
            "[Session] Simulated network jitter: link down, recovering in {:?}",
            recovery
        );
        self.emit_connection_if_changed(before);

        tokio::time::sleep(recovery).await;

        let before = self.connection_state();
        self.link_up.store(true, Ordering::SeqCst);
        info!("[Session] Simulated network jitter: link restored");
        self.emit_connection_if_changed(before);
    }

    /// Nudge metrics by a small random fraction in response to a market tick
    fn apply_market_event(&self, event: &DomainEvent) {
        let max = self.config.max_nudge_fraction.abs();
        let delta = if max > 0.0 {
            self.rng.lock().random_range(-max..=max)
        } else {
            0.0
        };

        if let Some(snapshot) = self.snapshot.write().as_mut() {
            snapshot.metrics.nudge(delta, event.emitted_at());
        } else {
            return;
        }
        self.emit(SessionUpdate::MetricsPatched);
    }

    /// Prepend a pushed alert, evicting the oldest beyond the cap
    fn apply_alert_event(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let alert: Alert = serde_json::from_value(event.payload().clone())
            .with_context(|| format!("malformed alert payload (sequence {})", event.sequence()))?;

        if let Some(snapshot) = self.snapshot.write().as_mut() {
            push_bounded(&mut snapshot.alerts, alert.clone(), self.config.alert_cap);
        } else {
            return Ok(());
        }
        self.emit(SessionUpdate::AlertAdded(alert));
        Ok(())
    }
}

/// Upstream outages are expected and only warned about
fn log_cycle_failure(cycle: &str, e: &DashboardError) {
    if e.is_recoverable() {
        warn!("[Session] {} failed, keeping previous values: {}", cycle, e);
    } else {
        error!("[Session] {} failed, keeping previous values: {}", cycle, e);
    }
}

fn parse_alerts(response: InvokeResponse, cap: usize) -> DashboardResult<Vec<Alert>> {
    if !response.is_success() {
        return Err(DashboardError::upstream(
            "invoke",
            format!(
                "{} returned status {}",
                RemoteFunction::AlertProcessor,
                response.status_code
            ),
        ));
    }
    let raw = response
        .body
        .get("alerts")
        .cloned()
        .ok_or_else(|| DashboardError::parse("response body has no alerts field"))?;

    let mut alerts: Vec<Alert> = serde_json::from_value(raw)?;
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    alerts.truncate(cap);
    Ok(alerts)
}

fn parse_analysis(response: InvokeResponse) -> DashboardResult<PortfolioAnalysis> {
    if !response.is_success() {
        return Err(DashboardError::upstream(
            "invoke",
            format!(
                "{} returned status {}",
                RemoteFunction::PortfolioAnalyzer,
                response.status_code
            ),
        ));
    }
    Ok(serde_json::from_value(response.body)?)
}

/// Run `job` every `period` until the session is dropped or the task aborted
fn spawn_periodic<F, Fut>(
    inner: &Arc<SessionInner>,
    period: Duration,
    fire_immediately: bool,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<SessionInner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak: Weak<SessionInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        let first = if fire_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            job(inner).await;
        }
    })
}

/// A long-lived dashboard session for one portfolio
pub struct DashboardSession {
    inner: Arc<SessionInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    live_feed: Mutex<Option<LiveFeedHandle>>,
    /// Serializes start/retry/refresh
    lifecycle: tokio::sync::Mutex<()>,
}

impl DashboardSession {
    /// Create a session; nothing runs until [`DashboardSession::start`]
    pub fn new(
        config: DashboardConfig,
        gateway: Arc<SourceGateway>,
        bus: Arc<EventBus>,
        clock: SharedClock,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                config,
                gateway,
                bus,
                clock,
                state: RwLock::new(SessionState::Uninitialized),
                snapshot: RwLock::new(None),
                link_up: AtomicBool::new(true),
                link_drops: AtomicU64::new(0),
                rng: Mutex::new(StdRng::from_os_rng()),
                updates,
            }),
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            live_feed: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Perform the initial load and start every loop and subscription
    ///
    /// Allowed from `Uninitialized` or `Failed`. An invalid config is
    /// rejected with `DashboardError::Config` before anything runs. On failure the session moves
    /// to `Failed` with a readable message and no snapshot is produced.
    pub async fn start(&self) -> DashboardResult<()> {
        let _guard = self.lifecycle.lock().await;

        match self.inner.state() {
            SessionState::Uninitialized | SessionState::Failed { .. } => {}
            other => {
                return Err(DashboardError::invalid_state(format!(
                    "cannot start a session that is {}",
                    other
                )));
            }
        }

        if let Err(e) = self.inner.config.validate() {
            error!("[Session] Refusing to start with invalid config: {}", e);
            return Err(e.into());
        }

        let portfolio_id = self.inner.config.portfolio_id.clone();
        info!("[Session] Loading initial snapshot for portfolio {}", portfolio_id);
        self.inner.set_state(SessionState::Loading);

        match self.inner.load_snapshot().await {
            Ok(snapshot) => {
                *self.inner.snapshot.write() = Some(snapshot);
                self.inner.emit(SessionUpdate::SnapshotReplaced);
                self.inner.set_state(SessionState::Ready);

                self.attach_live_events();
                self.spawn_loops();
                self.start_live_feed();

                info!("[Session] Portfolio {} ready", portfolio_id);
                Ok(())
            }
            Err(e) => {
                error!("[Session] Initial load for {} failed: {}", portfolio_id, e);
                self.inner.set_state(SessionState::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Re-run the initial load after a failure
    pub async fn retry(&self) -> DashboardResult<()> {
        match self.inner.state() {
            SessionState::Failed { .. } => self.start().await,
            other => Err(DashboardError::invalid_state(format!(
                "retry is only valid after a failed load (session is {})",
                other
            ))),
        }
    }

    /// Rebuild the whole snapshot now
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// returned; the session itself stays live.
    pub async fn refresh(&self) -> DashboardResult<()> {
        let _guard = self.lifecycle.lock().await;

        let state = self.inner.state();
        if !matches!(state, SessionState::Ready | SessionState::Degraded) {
            return Err(DashboardError::invalid_state(format!(
                "cannot refresh a session that is {}",
                state
            )));
        }

        self.inner.set_state(SessionState::Refreshing);
        self.inner
            .gateway
            .invalidate_metrics(&self.inner.config.portfolio_id);

        let outcome = match self.inner.load_snapshot().await {
            Ok(mut snapshot) => {
                if self.inner.state() == SessionState::Refreshing {
                    {
                        // Health belongs to the slow loop; a probe round may
                        // have landed while the load was in flight
                        let mut current = self.inner.snapshot.write();
                        if let Some(previous) = current.as_ref() {
                            snapshot.health = previous.health.clone();
                        }
                        *current = Some(snapshot);
                    }
                    self.inner.emit(SessionUpdate::SnapshotReplaced);
                    debug!("[Session] Manual refresh complete");
                }
                Ok(())
            }
            Err(e) => {
                warn!("[Session] Manual refresh failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        };

        self.inner.settle_after_refresh();
        outcome
    }

    /// Stop every loop, detach every subscription and stop the live feed
    pub fn shutdown(&self) {
        self.detach();
        if self.inner.state() != SessionState::Stopped {
            self.inner.set_state(SessionState::Stopped);
            info!(
                "[Session] Portfolio {} stopped",
                self.inner.config.portfolio_id
            );
        }
    }

    /// Latest snapshot, if the initial load has succeeded
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.snapshot.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    /// Receive snapshot and state changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn gateway(&self) -> &Arc<SourceGateway> {
        &self.inner.gateway
    }

    /// Number of simulated link drops so far
    pub fn link_drops(&self) -> u64 {
        self.inner.link_drops.load(Ordering::SeqCst)
    }

    fn attach_live_events(&self) {
        let mut subscriptions = self.subscriptions.lock();

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(self.inner.bus.subscribe(
            MARKET_DATA_TOPIC,
            move |event: &DomainEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_market_event(event);
                }
                Ok(())
            },
        ));

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(self.inner.bus.subscribe(
            RISK_ALERTS_TOPIC,
            move |event: &DomainEvent| match weak.upgrade() {
                Some(inner) => inner.apply_alert_event(event),
                None => Ok(()),
            },
        ));
    }

    fn spawn_loops(&self) {
        let intervals = self.inner.config.intervals.clone();
        let mut tasks = self.tasks.lock();

        tasks.push(spawn_periodic(
            &self.inner,
            intervals.metrics(),
            false,
            |inner| async move { inner.refresh_metrics().await },
        ));
        tasks.push(spawn_periodic(
            &self.inner,
            intervals.var_history(),
            false,
            |inner| async move { inner.refresh_var_series().await },
        ));
        tasks.push(spawn_periodic(
            &self.inner,
            intervals.health(),
            true,
            |inner| async move { inner.refresh_health().await },
        ));

        if self.inner.config.simulate_network_jitter {
            tasks.push(spawn_periodic(
                &self.inner,
                intervals.jitter(),
                false,
                |inner| async move { inner.jitter_link().await },
            ));
        }

        debug!("[Session] Started {} refresh loops", tasks.len());
    }

    fn start_live_feed(&self) {
        if !self.inner.config.live_feed.enabled {
            return;
        }
        let generator = LiveFeedGenerator::new(
            Arc::clone(&self.inner.bus),
            Arc::clone(&self.inner.clock),
            LiveFeedConfig::from(&self.inner.config.live_feed),
        );
        *self.live_feed.lock() = Some(Arc::new(generator).start());
    }

    fn detach(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for handle in self.subscriptions.lock().drain(..) {
            self.inner.bus.unsubscribe(&handle);
        }
        if let Some(feed) = self.live_feed.lock().take() {
            feed.stop();
        }
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for DashboardSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardSession")
            .field("portfolio_id", &self.inner.config.portfolio_id)
            .field("state", &self.inner.state())
            .field("tasks", &self.tasks.lock().len())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}
