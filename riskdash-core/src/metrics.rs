//! Risk metric data structures
//!
//! The numeric fields are opaque to this layer: they are fetched, cached,
//! nudged and forwarded, never derived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Real-time portfolio risk metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    pub portfolio_value: f64,
    pub daily_pnl: f64,
    /// 95% one-day Value at Risk
    pub var_95: f64,
    /// 99% one-day Value at Risk
    pub var_99: f64,
    pub expected_shortfall: f64,
    pub sharpe_ratio: f64,
    pub beta: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub updated_at: DateTime<Utc>,
}

impl MetricsRecord {
    /// Apply a small relative correction to the value-bearing fields
    ///
    /// `delta` is a fraction, e.g. `0.001` moves values up by 0.1%.
    /// Ratios (Sharpe, beta) are left alone.
    pub fn nudge(&mut self, delta: f64, at: DateTime<Utc>) {
        let factor = 1.0 + delta;
        let previous_value = self.portfolio_value;
        self.portfolio_value *= factor;
        self.daily_pnl += self.portfolio_value - previous_value;
        self.var_95 *= factor;
        self.var_99 *= factor;
        self.expected_shortfall *= factor;
        self.updated_at = at;
    }
}

/// A single point in a time series (e.g. VaR history)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Risk contribution of one category (sector, asset class)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownEntry {
    pub category: String,
    pub exposure: f64,
    pub var_contribution: f64,
    /// Share of portfolio (0.0 - 1.0)
    pub weight: f64,
}

/// Result of the portfolio analysis function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioAnalysis {
    #[serde(default)]
    pub diversification_score: f64,
    #[serde(default)]
    pub concentration_risk: f64,
    #[serde(default)]
    pub liquidity_score: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricsRecord {
        MetricsRecord {
            portfolio_value: 1_000_000.0,
            daily_pnl: 0.0,
            var_95: 20_000.0,
            var_99: 30_000.0,
            expected_shortfall: 35_000.0,
            sharpe_ratio: 1.4,
            beta: 0.9,
            volatility: 0.18,
            max_drawdown: 0.12,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_nudge_scales_value_fields_only() {
        let mut metrics = sample();
        metrics.nudge(0.01, Utc::now());

        assert!((metrics.portfolio_value - 1_010_000.0).abs() < 1e-6);
        assert!((metrics.daily_pnl - 10_000.0).abs() < 1e-6);
        assert!((metrics.var_95 - 20_200.0).abs() < 1e-6);
        assert_eq!(metrics.sharpe_ratio, 1.4);
        assert_eq!(metrics.beta, 0.9);
    }

    #[test]
    fn test_metrics_serialize_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("portfolioValue").is_some());
        assert!(json.get("var95").is_some());
    }
}
