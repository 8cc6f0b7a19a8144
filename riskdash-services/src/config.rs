//! Dashboard session configuration

use riskdash_core::DashboardError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default number of alerts kept on the snapshot
pub const DEFAULT_ALERT_CAP: usize = 10;

/// Configuration for a dashboard session and its collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Portfolio the session aggregates; part of every cache key
    #[serde(default = "default_portfolio_id")]
    pub portfolio_id: String,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub intervals: IntervalConfig,
    #[serde(default)]
    pub live_feed: LiveFeedSettings,
    /// Maximum alerts kept on the snapshot
    #[serde(default = "default_alert_cap")]
    pub alert_cap: usize,
    /// Probability that a probe (or jitter check) finds the link up
    #[serde(default = "default_connected_probability")]
    pub connected_probability: f64,
    /// Days of VaR history requested from the query engine
    #[serde(default = "default_var_history_days")]
    pub var_history_days: u32,
    /// Largest relative nudge applied to metrics per market tick
    #[serde(default = "default_nudge_fraction")]
    pub max_nudge_fraction: f64,
    /// Enable the simulated network jitter loop
    #[serde(default)]
    pub simulate_network_jitter: bool,
    /// Probability that a simulated non-probe call fails
    #[serde(default)]
    pub simulated_failure_rate: f64,
}

/// Base endpoint URL per capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub metrics_url: String,
    pub graphql_url: String,
    pub lambda_url: String,
    pub timescale_url: String,
}

/// A named service probed by the health loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub endpoint: String,
}

/// Cache TTL per key class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub metrics_ttl_secs: u64,
}

/// Periods of the session's recurring loops (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub metrics_ms: u64,
    pub var_history_ms: u64,
    pub health_ms: u64,
    pub jitter_ms: u64,
    pub jitter_recovery_ms: u64,
}

/// Live feed generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFeedSettings {
    pub enabled: bool,
    pub tick_ms: u64,
    /// Publish a risk alert every N market ticks (0 disables alerts)
    pub alert_every: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            portfolio_id: default_portfolio_id(),
            endpoints: EndpointConfig::default(),
            cache: CacheConfig::default(),
            intervals: IntervalConfig::default(),
            live_feed: LiveFeedSettings::default(),
            alert_cap: default_alert_cap(),
            connected_probability: default_connected_probability(),
            var_history_days: default_var_history_days(),
            max_nudge_fraction: default_nudge_fraction(),
            simulate_network_jitter: false,
            simulated_failure_rate: 0.0,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            metrics_url: "http://localhost:8080/api/metrics".to_string(),
            graphql_url: "http://localhost:8080/graphql".to_string(),
            lambda_url: "http://localhost:9000/2015-03-31/functions".to_string(),
            timescale_url: "postgres://localhost:5432/risk".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { metrics_ttl_secs: 3 }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            metrics_ms: 5_000,
            var_history_ms: 15_000,
            health_ms: 30_000,
            jitter_ms: 10_000,
            jitter_recovery_ms: 2_000,
        }
    }
}

impl Default for LiveFeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: 100,
            alert_every: 50,
        }
    }
}

impl EndpointConfig {
    /// Services probed by the health loop, one per capability backend
    pub fn services(&self) -> Vec<ServiceEndpoint> {
        [
            ("metrics-api", &self.metrics_url),
            ("graphql", &self.graphql_url),
            ("lambda", &self.lambda_url),
            ("timescaledb", &self.timescale_url),
        ]
        .into_iter()
        .map(|(name, endpoint)| ServiceEndpoint {
            name: name.to_string(),
            endpoint: endpoint.clone(),
        })
        .collect()
    }
}

impl CacheConfig {
    pub fn metrics_ttl(&self) -> Duration {
        Duration::from_secs(self.metrics_ttl_secs)
    }
}

impl IntervalConfig {
    pub fn metrics(&self) -> Duration {
        Duration::from_millis(self.metrics_ms)
    }

    pub fn var_history(&self) -> Duration {
        Duration::from_millis(self.var_history_ms)
    }

    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn jitter_recovery(&self) -> Duration {
        Duration::from_millis(self.jitter_recovery_ms)
    }
}

impl LiveFeedSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl DashboardConfig {
    /// Load configuration from environment variables
    ///
    /// Every variable is optional; unset ones keep their defaults:
    /// - RISKDASH_PORTFOLIO_ID
    /// - RISKDASH_METRICS_URL, RISKDASH_GRAPHQL_URL, RISKDASH_LAMBDA_URL,
    ///   RISKDASH_TIMESCALE_URL
    /// - RISKDASH_METRICS_TTL_SECS
    /// - RISKDASH_METRICS_INTERVAL_MS, RISKDASH_VAR_INTERVAL_MS,
    ///   RISKDASH_HEALTH_INTERVAL_MS
    /// - RISKDASH_JITTER_INTERVAL_MS, RISKDASH_JITTER_RECOVERY_MS
    /// - RISKDASH_VAR_HISTORY_DAYS
    /// - RISKDASH_LIVE_FEED (true/false), RISKDASH_LIVE_TICK_MS,
    ///   RISKDASH_ALERT_EVERY
    /// - RISKDASH_ALERT_CAP, RISKDASH_CONNECTED_PROBABILITY
    /// - RISKDASH_SIMULATE_JITTER (true/false), RISKDASH_FAILURE_RATE
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(portfolio_id) = env::var("RISKDASH_PORTFOLIO_ID") {
            config.portfolio_id = portfolio_id;
        }
        if let Ok(url) = env::var("RISKDASH_METRICS_URL") {
            config.endpoints.metrics_url = url;
        }
        if let Ok(url) = env::var("RISKDASH_GRAPHQL_URL") {
            config.endpoints.graphql_url = url;
        }
        if let Ok(url) = env::var("RISKDASH_LAMBDA_URL") {
            config.endpoints.lambda_url = url;
        }
        if let Ok(url) = env::var("RISKDASH_TIMESCALE_URL") {
            config.endpoints.timescale_url = url;
        }

        if let Some(ttl) = parse_var("RISKDASH_METRICS_TTL_SECS")? {
            config.cache.metrics_ttl_secs = ttl;
        }
        if let Some(ms) = parse_var("RISKDASH_METRICS_INTERVAL_MS")? {
            config.intervals.metrics_ms = ms;
        }
        if let Some(ms) = parse_var("RISKDASH_VAR_INTERVAL_MS")? {
            config.intervals.var_history_ms = ms;
        }
        if let Some(ms) = parse_var("RISKDASH_HEALTH_INTERVAL_MS")? {
            config.intervals.health_ms = ms;
        }
        if let Some(ms) = parse_var("RISKDASH_JITTER_INTERVAL_MS")? {
            config.intervals.jitter_ms = ms;
        }
        if let Some(ms) = parse_var("RISKDASH_JITTER_RECOVERY_MS")? {
            config.intervals.jitter_recovery_ms = ms;
        }
        if let Some(days) = parse_var("RISKDASH_VAR_HISTORY_DAYS")? {
            config.var_history_days = days;
        }
        if let Some(enabled) = parse_var("RISKDASH_LIVE_FEED")? {
            config.live_feed.enabled = enabled;
        }
        if let Some(ms) = parse_var("RISKDASH_LIVE_TICK_MS")? {
            config.live_feed.tick_ms = ms;
        }
        if let Some(every) = parse_var("RISKDASH_ALERT_EVERY")? {
            config.live_feed.alert_every = every;
        }
        if let Some(cap) = parse_var("RISKDASH_ALERT_CAP")? {
            config.alert_cap = cap;
        }
        if let Some(p) = parse_var("RISKDASH_CONNECTED_PROBABILITY")? {
            config.connected_probability = p;
        }
        if let Some(enabled) = parse_var("RISKDASH_SIMULATE_JITTER")? {
            config.simulate_network_jitter = enabled;
        }
        if let Some(rate) = parse_var("RISKDASH_FAILURE_RATE")? {
            config.simulated_failure_rate = rate;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portfolio_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "portfolio_id".to_string(),
                error: "must not be empty".to_string(),
            });
        }
        let probabilities = [
            ("connected_probability", self.connected_probability),
            ("simulated_failure_rate", self.simulated_failure_rate),
        ];
        for (field, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    error: format!("{} is not within 0.0..=1.0", value),
                });
            }
        }
        if self.alert_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "alert_cap".to_string(),
                error: "must be at least 1".to_string(),
            });
        }
        let periods = [
            ("intervals.metrics_ms", self.intervals.metrics_ms),
            ("intervals.var_history_ms", self.intervals.var_history_ms),
            ("intervals.health_ms", self.intervals.health_ms),
            ("intervals.jitter_ms", self.intervals.jitter_ms),
            ("live_feed.tick_ms", self.live_feed.tick_ms),
        ];
        for (field, value) in periods {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    error: "period must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: name.to_string(),
                error: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn default_portfolio_id() -> String {
    "default".to_string()
}

fn default_alert_cap() -> usize {
    DEFAULT_ALERT_CAP
}

fn default_connected_probability() -> f64 {
    0.95
}

fn default_var_history_days() -> u32 {
    30
}

fn default_nudge_fraction() -> f64 {
    0.001
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {error}")]
    InvalidValue { field: String, error: String },
}

impl From<ConfigError> for DashboardError {
    fn from(e: ConfigError) -> Self {
        DashboardError::config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DashboardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alert_cap, 10);
        assert!(config.cache.metrics_ttl() < config.intervals.metrics());
        assert!(!config.simulate_network_jitter);
    }

    #[test]
    fn test_parse_partial_json() {
        let json = r#"{ "portfolio_id": "growth-fund", "alert_cap": 5 }"#;
        let config: DashboardConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.portfolio_id, "growth-fund");
        assert_eq!(config.alert_cap, 5);
        assert_eq!(config.intervals.health_ms, 30_000);
    }

    #[test]
    fn test_rejects_out_of_range_probability() {
        let config = DashboardConfig {
            connected_probability: 1.5,
            ..DashboardConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "connected_probability"
        ));
    }

    #[test]
    fn test_rejects_zero_period() {
        let mut config = DashboardConfig::default();
        config.intervals.metrics_ms = 0;

        let err: DashboardError = config.validate().unwrap_err().into();
        assert!(matches!(err, DashboardError::Config(ref m) if m.contains("intervals.metrics_ms")));
    }

    #[test]
    fn test_from_env_reads_jitter_and_feed_settings() {
        env::set_var("RISKDASH_JITTER_INTERVAL_MS", "4000");
        env::set_var("RISKDASH_JITTER_RECOVERY_MS", "750");
        env::set_var("RISKDASH_VAR_HISTORY_DAYS", "90");
        env::set_var("RISKDASH_ALERT_EVERY", "20");

        let config = DashboardConfig::from_env();

        env::remove_var("RISKDASH_JITTER_INTERVAL_MS");
        env::remove_var("RISKDASH_JITTER_RECOVERY_MS");
        env::remove_var("RISKDASH_VAR_HISTORY_DAYS");
        env::remove_var("RISKDASH_ALERT_EVERY");

        let config = config.unwrap();
        assert_eq!(config.intervals.jitter(), Duration::from_millis(4_000));
        assert_eq!(config.intervals.jitter_recovery(), Duration::from_millis(750));
        assert_eq!(config.var_history_days, 90);
        assert_eq!(config.live_feed.alert_every, 20);
    }

    #[test]
    fn test_services_cover_every_capability() {
        let names: Vec<String> = EndpointConfig::default()
            .services()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["metrics-api", "graphql", "lambda", "timescaledb"]);
    }
}
