//! The assembled dashboard view

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Alert, BreakdownEntry, HealthRecord, MetricsRecord, PortfolioAnalysis, SeriesPoint};

/// Series name under which VaR history is stored
pub const VAR_SERIES: &str = "var";

/// One consistent view of all dashboard data at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub portfolio_id: String,
    pub metrics: MetricsRecord,
    pub series_by_name: BTreeMap<String, Vec<SeriesPoint>>,
    /// Most recent first, bounded by the session's alert cap
    pub alerts: Vec<Alert>,
    pub breakdown: Vec<BreakdownEntry>,
    pub analysis: PortfolioAnalysis,
    pub health: HealthRecord,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn var_series(&self) -> &[SeriesPoint] {
        self.series_by_name
            .get(VAR_SERIES)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
