//! Source Gateway
//!
//! Uniform asynchronous facade over the metrics, query, function and health
//! capabilities. Only metrics fetches are memoized in the expiring cache.

pub mod simulation;
pub mod sources;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use riskdash_core::{
    DashboardResult, InvokeResponse, MetricsRecord, QueryDescriptor, QueryResult,
    RemoteFunction, ServiceHealthCheck,
};

use crate::config::ServiceEndpoint;
use crate::expiring_cache::ExpiringCache;
use sources::{FunctionInvoker, HealthProber, MetricsSource, QueryEngine};

pub use simulation::{
    Capability, RandomizedStrategy, ScriptedStrategy, SimulatedBackend, SimulationStrategy,
};

/// Cache key for a portfolio's real-time metrics
pub fn metrics_cache_key(portfolio_id: &str) -> String {
    format!("realtime_metrics:{}", portfolio_id)
}

/// Gateway counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Facade over the four upstream capabilities
pub struct SourceGateway {
    metrics: Arc<dyn MetricsSource>,
    queries: Arc<dyn QueryEngine>,
    functions: Arc<dyn FunctionInvoker>,
    prober: Arc<dyn HealthProber>,
    cache: ExpiringCache<MetricsRecord>,
    metrics_ttl: Duration,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl SourceGateway {
    /// Create a gateway with one backend serving every capability
    pub fn from_backend<B>(
        backend: Arc<B>,
        cache: ExpiringCache<MetricsRecord>,
        metrics_ttl: Duration,
    ) -> Self
    where
        B: MetricsSource + QueryEngine + FunctionInvoker + HealthProber + 'static,
    {
        Self {
            metrics: backend.clone(),
            queries: backend.clone(),
            functions: backend.clone(),
            prober: backend,
            cache,
            metrics_ttl,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn with_metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics = source;
        self
    }

    pub fn with_query_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.queries = engine;
        self
    }

    pub fn with_function_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.functions = invoker;
        self
    }

    pub fn with_health_prober(mut self, prober: Arc<dyn HealthProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Fetch real-time metrics, served from cache while fresh
    #[instrument(skip(self))]
    pub async fn fetch_metrics(&self, portfolio_id: &str) -> DashboardResult<MetricsRecord> {
        let key = metrics_cache_key(portfolio_id);

        if let Some(cached) = self.cache.fetch(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("[Gateway] Metrics cache hit for {}", key);
            return Ok(cached);
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let metrics = self.metrics.fetch_metrics(portfolio_id).await?;
        self.cache.store(key, metrics.clone(), self.metrics_ttl);
        Ok(metrics)
    }

    /// Run a query; unrecognised descriptors yield `QueryResult::Empty`
    #[instrument(skip(self, query, variables))]
    pub async fn run_query(
        &self,
        query: &QueryDescriptor,
        variables: &serde_json::Value,
    ) -> DashboardResult<QueryResult> {
        let result = self.queries.execute(query, variables).await?;
        if result == QueryResult::Empty {
            debug!("[Gateway] Query matched no known shape, returning empty result");
        }
        Ok(result)
    }

    /// Invoke a named remote function
    ///
    /// Fails with `UnknownOperation` when `function_name` is not one of the
    /// known functions; no upstream call is made in that case.
    #[instrument(skip(self, payload))]
    pub async fn invoke(
        &self,
        function_name: &str,
        payload: serde_json::Value,
    ) -> DashboardResult<InvokeResponse> {
        let function: RemoteFunction = function_name.parse()?;
        self.functions.invoke(function, &payload).await
    }

    /// Probe a single service
    #[instrument(skip(self))]
    pub async fn probe(
        &self,
        service_name: &str,
        endpoint: &str,
    ) -> DashboardResult<ServiceHealthCheck> {
        self.prober.probe(service_name, endpoint).await
    }

    /// Probe every service concurrently, waiting for all of them
    ///
    /// A probe that errors is reported as unreachable rather than failing
    /// the round.
    pub async fn probe_all(&self, services: &[ServiceEndpoint]) -> Vec<ServiceHealthCheck> {
        let probes = services.iter().map(|service| async move {
            match self.probe(&service.name, &service.endpoint).await {
                Ok(check) => check,
                Err(e) => {
                    warn!("[Gateway] Probe for {} failed: {}", service.name, e);
                    ServiceHealthCheck {
                        service_name: service.name.clone(),
                        reachable: false,
                        latency_ms: 0,
                        endpoint: service.endpoint.clone(),
                        checked_at: chrono::Utc::now(),
                    }
                }
            }
        });

        join_all(probes).await
    }

    /// Drop the cached metrics for a portfolio
    pub fn invalidate_metrics(&self, portfolio_id: &str) -> bool {
        self.cache.invalidate(&metrics_cache_key(portfolio_id))
    }

    pub fn cache(&self) -> &ExpiringCache<MetricsRecord> {
        &self.cache
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SourceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceGateway")
            .field("cache", &self.cache)
            .field("metrics_ttl", &self.metrics_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock, SystemClock};
    use async_trait::async_trait;
    use riskdash_core::DashboardError;
    use serde_json::json;
    use std::time::Instant;

    fn gateway_with(
        strategy: Arc<dyn SimulationStrategy>,
        clock: SharedClock,
    ) -> (Arc<SimulatedBackend>, SourceGateway) {
        let backend = Arc::new(SimulatedBackend::new(strategy, clock.clone()));
        let cache = ExpiringCache::new(clock).with_proactive_eviction(false);
        let gateway = SourceGateway::from_backend(backend.clone(), cache, Duration::from_secs(3));
        (backend, gateway)
    }

    #[tokio::test]
    async fn test_metrics_cache_hit_skips_upstream() {
        let clock = Arc::new(ManualClock::default());
        let (backend, gateway) = gateway_with(Arc::new(ScriptedStrategy::new()), clock.clone());

        let first = gateway.fetch_metrics("p1").await.unwrap();
        let second = gateway.fetch_metrics("p1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls(Capability::Metrics), 1);
        assert_eq!(gateway.stats(), GatewayStats { cache_hits: 1, cache_misses: 1 });

        clock.advance(chrono::Duration::seconds(4));
        gateway.fetch_metrics("p1").await.unwrap();
        assert_eq!(backend.calls(Capability::Metrics), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_has_no_latency() {
        let strategy = Arc::new(ScriptedStrategy::new().with_latency(Duration::from_millis(50)));
        let (_, gateway) = gateway_with(strategy, Arc::new(SystemClock));

        gateway.fetch_metrics("p1").await.unwrap();
        let started = Instant::now();
        gateway.fetch_metrics("p1").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_metrics_cache_is_keyed_per_portfolio() {
        let clock = Arc::new(ManualClock::default());
        let (backend, gateway) = gateway_with(Arc::new(ScriptedStrategy::new()), clock);

        gateway.fetch_metrics("growth").await.unwrap();
        gateway.fetch_metrics("income").await.unwrap();

        assert_eq!(backend.calls(Capability::Metrics), 2);
        assert_eq!(gateway.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let strategy = Arc::new(ScriptedStrategy::new());
        let (_, gateway) = gateway_with(strategy.clone(), Arc::new(ManualClock::default()));

        strategy.set_failing(Capability::Metrics, true);
        assert!(gateway.fetch_metrics("p1").await.is_err());
        assert!(gateway.cache().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_known_and_unknown_functions() {
        let (backend, gateway) =
            gateway_with(Arc::new(ScriptedStrategy::new()), Arc::new(SystemClock));

        let response = gateway.invoke("ALERT_PROCESSOR", json!({})).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.body["alerts"].is_array());

        let err = gateway.invoke("NOT_A_FUNCTION", json!({})).await.unwrap_err();
        assert_eq!(err, DashboardError::UnknownOperation("NOT_A_FUNCTION".to_string()));
        assert_eq!(backend.calls(Capability::Invoke), 1);
    }

    #[tokio::test]
    async fn test_unknown_query_shape_is_empty() {
        let (_, gateway) = gateway_with(Arc::new(ScriptedStrategy::new()), Arc::new(SystemClock));
        let result = gateway
            .run_query(&QueryDescriptor::new("{ somethingElse }"), &json!({}))
            .await
            .unwrap();
        assert_eq!(result, QueryResult::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_all_runs_concurrently() {
        let strategy = Arc::new(ScriptedStrategy::new().with_latency(Duration::from_millis(200)));
        let (_, gateway) = gateway_with(strategy, Arc::new(SystemClock));
        let services = crate::config::EndpointConfig::default().services();

        let started = tokio::time::Instant::now();
        let checks = gateway.probe_all(&services).await;

        assert_eq!(checks.len(), 4);
        assert!(checks.iter().all(|c| c.reachable));
        // Sequential probing would take 800ms
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    struct BrokenProber;

    #[async_trait]
    impl HealthProber for BrokenProber {
        async fn probe(
            &self,
            service_name: &str,
            _endpoint: &str,
        ) -> DashboardResult<ServiceHealthCheck> {
            Err(DashboardError::upstream(
                "probe",
                format!("{} refused connection", service_name),
            ))
        }
    }

    #[tokio::test]
    async fn test_probe_error_reported_as_unreachable() {
        let (_, gateway) = gateway_with(Arc::new(ScriptedStrategy::new()), Arc::new(SystemClock));
        let gateway = gateway.with_health_prober(Arc::new(BrokenProber));
        let services = crate::config::EndpointConfig::default().services();

        let checks = gateway.probe_all(&services).await;
        assert_eq!(checks.len(), services.len());
        assert!(checks.iter().all(|c| !c.reachable));
    }
}
