//! Simulated backend for demos and tests
//!
//! Stands in for the metrics API, query engine, function runtime and health
//! endpoints. Latency, failures and generated values all come from a
//! [`SimulationStrategy`], so tests can make every call deterministic.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::debug;

use riskdash_core::{
    Alert, AlertSeverity, BreakdownEntry, DashboardError, DashboardResult, InvokeResponse,
    MetricsRecord, PortfolioAnalysis, QueryDescriptor, QueryResult, QueryShape, RemoteFunction,
    SeriesPoint, ServiceHealthCheck,
};

use super::sources::{FunctionInvoker, HealthProber, MetricsSource, QueryEngine};
use crate::clock::SharedClock;

/// Sectors reported by the breakdown query
const SECTORS: &[&str] = &[
    "Technology",
    "Financials",
    "Healthcare",
    "Energy",
    "Consumer",
];

/// Alert templates: (metric, severity, message)
const ALERT_TEMPLATES: &[(&str, AlertSeverity, &str)] = &[
    ("var95", AlertSeverity::Warning, "VaR (95%) approaching portfolio limit"),
    ("concentration", AlertSeverity::Info, "Technology exposure above 30% of NAV"),
    ("drawdown", AlertSeverity::Critical, "Drawdown exceeded 10% threshold"),
    ("volatility", AlertSeverity::Warning, "Realized volatility up 2 sigma intraday"),
    ("liquidity", AlertSeverity::Info, "Liquidity score below weekly average"),
];

/// Build an alert from template `index` (wrapped into range)
pub fn alert_from_template(index: usize, created_at: DateTime<Utc>) -> Alert {
    let (metric, severity, message) = ALERT_TEMPLATES[index % ALERT_TEMPLATES.len()];
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        severity,
        message: message.to_string(),
        metric: Some(metric.to_string()),
        created_at,
    }
}

/// Number of alert templates available
pub fn alert_template_count() -> usize {
    ALERT_TEMPLATES.len()
}

/// The four simulated capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Metrics,
    Query,
    Invoke,
    Probe,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Metrics => "metrics",
            Capability::Query => "query",
            Capability::Invoke => "invoke",
            Capability::Probe => "probe",
        }
    }

    fn index(&self) -> usize {
        match self {
            Capability::Metrics => 0,
            Capability::Query => 1,
            Capability::Invoke => 2,
            Capability::Probe => 3,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Latency, failure and value source for the simulated backend
pub trait SimulationStrategy: Send + Sync + fmt::Debug {
    /// Simulated round-trip time for one call
    fn latency(&self, capability: Capability) -> Duration;

    /// Whether this call fails (for probes: whether the service is unreachable)
    fn should_fail(&self, capability: Capability) -> bool;

    /// Draw a value within `low..high`
    fn sample(&self, low: f64, high: f64) -> f64;
}

/// Random latency and outcomes, optionally seeded
#[derive(Debug)]
pub struct RandomizedStrategy {
    rng: Mutex<StdRng>,
    /// Probability a probe finds its service reachable
    connected_probability: f64,
    /// Probability any non-probe call fails
    failure_rate: f64,
}

impl RandomizedStrategy {
    pub fn new(connected_probability: f64) -> Self {
        Self::with_rng(StdRng::from_os_rng(), connected_probability)
    }

    /// Reproducible sequence of latencies and outcomes
    pub fn seeded(seed: u64, connected_probability: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), connected_probability)
    }

    fn with_rng(rng: StdRng, connected_probability: f64) -> Self {
        Self {
            rng: Mutex::new(rng),
            connected_probability: connected_probability.clamp(0.0, 1.0),
            failure_rate: 0.0,
        }
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    fn latency_bounds_ms(capability: Capability) -> (u64, u64) {
        match capability {
            Capability::Metrics => (100, 300),
            Capability::Query => (200, 500),
            Capability::Invoke => (300, 800),
            Capability::Probe => (50, 250),
        }
    }
}

impl SimulationStrategy for RandomizedStrategy {
    fn latency(&self, capability: Capability) -> Duration {
        let (low, high) = Self::latency_bounds_ms(capability);
        Duration::from_millis(self.rng.lock().random_range(low..high))
    }

    fn should_fail(&self, capability: Capability) -> bool {
        let mut rng = self.rng.lock();
        match capability {
            Capability::Probe => !rng.random_bool(self.connected_probability),
            _ => rng.random_bool(self.failure_rate),
        }
    }

    fn sample(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.lock().random_range(low..high)
    }
}

/// Deterministic strategy: fixed latency, failures toggled per capability
#[derive(Debug, Default)]
pub struct ScriptedStrategy {
    failing: RwLock<HashSet<Capability>>,
    latency: Duration,
}

impl ScriptedStrategy {
    /// Zero latency, nothing failing
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call to `capability` fail (or succeed again)
    pub fn set_failing(&self, capability: Capability, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(capability);
        } else {
            set.remove(&capability);
        }
    }
}

impl SimulationStrategy for ScriptedStrategy {
    fn latency(&self, _capability: Capability) -> Duration {
        self.latency
    }

    fn should_fail(&self, capability: Capability) -> bool {
        self.failing.read().contains(&capability)
    }

    fn sample(&self, low: f64, high: f64) -> f64 {
        (low + high) / 2.0
    }
}

/// In-process stand-in for every upstream capability
#[derive(Debug)]
pub struct SimulatedBackend {
    strategy: Arc<dyn SimulationStrategy>,
    clock: SharedClock,
    calls: [AtomicU64; 4],
}

impl SimulatedBackend {
    pub fn new(strategy: Arc<dyn SimulationStrategy>, clock: SharedClock) -> Self {
        Self {
            strategy,
            clock,
            calls: Default::default(),
        }
    }

    /// How many times `capability` has been called
    pub fn calls(&self, capability: Capability) -> u64 {
        self.calls[capability.index()].load(Ordering::Relaxed)
    }

    /// Count the call, wait out the simulated latency, report the outcome
    async fn round_trip(&self, capability: Capability) -> bool {
        self.calls[capability.index()].fetch_add(1, Ordering::Relaxed);
        let latency = self.strategy.latency(capability);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        !self.strategy.should_fail(capability)
    }

    fn upstream_failure(capability: Capability) -> DashboardError {
        DashboardError::upstream(capability.name(), "simulated upstream failure")
    }

    fn generate_metrics(&self) -> MetricsRecord {
        let s = &self.strategy;
        let portfolio_value = s.sample(2_400_000.0, 2_600_000.0);
        let var_95 = portfolio_value * s.sample(0.015, 0.025);
        let var_99 = var_95 * s.sample(1.35, 1.5);

        MetricsRecord {
            portfolio_value,
            daily_pnl: s.sample(-25_000.0, 35_000.0),
            var_95,
            var_99,
            expected_shortfall: var_99 * s.sample(1.1, 1.25),
            sharpe_ratio: s.sample(0.8, 2.2),
            beta: s.sample(0.7, 1.3),
            volatility: s.sample(0.12, 0.28),
            max_drawdown: s.sample(0.05, 0.2),
            updated_at: self.clock.now(),
        }
    }

    fn generate_var_history(&self, days: u64) -> Vec<SeriesPoint> {
        let now = self.clock.now();
        (0..days)
            .map(|i| SeriesPoint {
                timestamp: now - chrono::Duration::days((days - 1 - i) as i64),
                value: self.strategy.sample(40_000.0, 60_000.0),
            })
            .collect()
    }

    fn generate_breakdown(&self) -> Vec<BreakdownEntry> {
        let raw: Vec<f64> = SECTORS
            .iter()
            .map(|_| self.strategy.sample(0.5, 1.5))
            .collect();
        let total: f64 = raw.iter().sum();

        SECTORS
            .iter()
            .zip(raw)
            .map(|(sector, w)| {
                let weight = w / total;
                let exposure = weight * 2_500_000.0;
                BreakdownEntry {
                    category: sector.to_string(),
                    exposure,
                    var_contribution: exposure * self.strategy.sample(0.01, 0.03),
                    weight,
                }
            })
            .collect()
    }

    fn generate_analysis(&self) -> PortfolioAnalysis {
        PortfolioAnalysis {
            diversification_score: self.strategy.sample(0.6, 0.9),
            concentration_risk: self.strategy.sample(0.1, 0.4),
            liquidity_score: self.strategy.sample(0.7, 0.95),
            recommendations: vec![
                "Reduce Technology overweight".to_string(),
                "Add duration hedge against rate volatility".to_string(),
            ],
        }
    }
}

#[async_trait]
impl MetricsSource for SimulatedBackend {
    async fn fetch_metrics(&self, portfolio_id: &str) -> DashboardResult<MetricsRecord> {
        if !self.round_trip(Capability::Metrics).await {
            return Err(Self::upstream_failure(Capability::Metrics));
        }
        debug!("Simulated metrics fetch for {}", portfolio_id);
        Ok(self.generate_metrics())
    }
}

#[async_trait]
impl QueryEngine for SimulatedBackend {
    async fn execute(
        &self,
        query: &QueryDescriptor,
        variables: &serde_json::Value,
    ) -> DashboardResult<QueryResult> {
        if !self.round_trip(Capability::Query).await {
            return Err(Self::upstream_failure(Capability::Query));
        }

        let result = match query.shape() {
            Some(QueryShape::TimeSeries) => {
                let days = variables
                    .get("days")
                    .and_then(|d| d.as_u64())
                    .unwrap_or(30)
                    .clamp(1, 365);
                QueryResult::TimeSeries(self.generate_var_history(days))
            }
            Some(QueryShape::Breakdown) => QueryResult::Breakdown(self.generate_breakdown()),
            None => QueryResult::Empty,
        };
        Ok(result)
    }
}

#[async_trait]
impl FunctionInvoker for SimulatedBackend {
    async fn invoke(
        &self,
        function: RemoteFunction,
        payload: &serde_json::Value,
    ) -> DashboardResult<InvokeResponse> {
        if !self.round_trip(Capability::Invoke).await {
            return Err(Self::upstream_failure(Capability::Invoke));
        }

        let now = self.clock.now();
        let body = match function {
            RemoteFunction::AlertProcessor => {
                let alerts: Vec<Alert> = (0..3).map(|i| alert_from_template(i, now)).collect();
                json!({ "alerts": alerts })
            }
            RemoteFunction::PortfolioAnalyzer => serde_json::to_value(self.generate_analysis())?,
            RemoteFunction::RiskCalculator => {
                let confidence = payload
                    .get("confidence")
                    .and_then(|c| c.as_f64())
                    .unwrap_or(0.95);
                json!({
                    "var": self.strategy.sample(40_000.0, 60_000.0),
                    "confidence": confidence,
                    "horizonDays": 1,
                })
            }
        };
        Ok(InvokeResponse::ok(body))
    }
}

#[async_trait]
impl HealthProber for SimulatedBackend {
    async fn probe(
        &self,
        service_name: &str,
        endpoint: &str,
    ) -> DashboardResult<ServiceHealthCheck> {
        let started = tokio::time::Instant::now();
        let reachable = self.round_trip(Capability::Probe).await;

        Ok(ServiceHealthCheck {
            service_name: service_name.to_string(),
            reachable,
            latency_ms: started.elapsed().as_millis() as u64,
            endpoint: endpoint.to_string(),
            checked_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn scripted() -> (Arc<ScriptedStrategy>, SimulatedBackend) {
        let strategy = Arc::new(ScriptedStrategy::new());
        let backend = SimulatedBackend::new(strategy.clone(), Arc::new(SystemClock));
        (strategy, backend)
    }

    #[tokio::test]
    async fn test_query_dispatch_by_shape() {
        let (_, backend) = scripted();

        let series = backend
            .execute(&QueryDescriptor::var_history(), &json!({"days": 7}))
            .await
            .unwrap();
        assert_eq!(series.into_series().map(|s| s.len()), Some(7));

        let breakdown = backend
            .execute(&QueryDescriptor::risk_breakdown(), &json!({}))
            .await
            .unwrap()
            .into_breakdown()
            .unwrap();
        let total_weight: f64 = breakdown.iter().map(|b| b.weight).sum();
        assert_eq!(breakdown.len(), SECTORS.len());
        assert!((total_weight - 1.0).abs() < 1e-9);

        let unknown = backend
            .execute(&QueryDescriptor::new("query { positions }"), &json!({}))
            .await
            .unwrap();
        assert_eq!(unknown, QueryResult::Empty);
    }

    #[tokio::test]
    async fn test_var_history_is_chronological() {
        let (_, backend) = scripted();
        let points = backend
            .execute(&QueryDescriptor::var_history(), &json!({"days": 5}))
            .await
            .unwrap()
            .into_series()
            .unwrap();

        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_alert_processor_body() {
        let (_, backend) = scripted();
        let response = backend
            .invoke(RemoteFunction::AlertProcessor, &json!({}))
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        let alerts = response.body["alerts"].as_array().unwrap();
        assert_eq!(alerts.len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure_toggles() {
        let (strategy, backend) = scripted();

        strategy.set_failing(Capability::Metrics, true);
        let err = backend.fetch_metrics("p1").await.unwrap_err();
        assert!(matches!(err, DashboardError::UpstreamUnavailable { .. }));

        strategy.set_failing(Capability::Metrics, false);
        assert!(backend.fetch_metrics("p1").await.is_ok());
        assert_eq!(backend.calls(Capability::Metrics), 2);
    }

    #[tokio::test]
    async fn test_failed_probe_reports_unreachable() {
        let (strategy, backend) = scripted();
        strategy.set_failing(Capability::Probe, true);

        let check = backend.probe("graphql", "http://localhost/graphql").await.unwrap();
        assert!(!check.reachable);
        assert_eq!(check.service_name, "graphql");
    }

    #[test]
    fn test_randomized_latency_within_bounds() {
        let strategy = RandomizedStrategy::seeded(7, 1.0);
        for _ in 0..50 {
            let latency = strategy.latency(Capability::Probe);
            assert!(latency >= Duration::from_millis(50));
            assert!(latency < Duration::from_millis(250));
            assert!(!strategy.should_fail(Capability::Probe));
            assert!(!strategy.should_fail(Capability::Metrics));
        }
    }

    #[test]
    fn test_seeded_strategies_agree() {
        let a = RandomizedStrategy::seeded(42, 0.9);
        let b = RandomizedStrategy::seeded(42, 0.9);
        for _ in 0..10 {
            assert_eq!(a.sample(0.0, 1.0), b.sample(0.0, 1.0));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rate_applies_to_non_probe_calls() {
        let strategy = Arc::new(RandomizedStrategy::seeded(3, 1.0).with_failure_rate(0.25));
        let backend = SimulatedBackend::new(strategy, Arc::new(SystemClock));

        let mut failures = 0;
        for _ in 0..400 {
            match backend.fetch_metrics("p1").await {
                Ok(_) => {}
                Err(DashboardError::UpstreamUnavailable { capability, .. }) => {
                    assert_eq!(capability, "metrics");
                    failures += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        // 100 expected; the bounds leave several standard deviations of room
        assert!((60..=140).contains(&failures), "{} failures", failures);
        let check = backend.probe("graphql", "http://localhost/graphql").await.unwrap();
        assert!(check.reachable);
    }
}
