//! Risk alerts surfaced on the dashboard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// A single risk alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(default)]
    pub severity: AlertSeverity,
    pub message: String,
    /// Metric that triggered the alert, if any (e.g. "var95")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Prepend `alert` to a most-recent-first list, keeping at most `cap` entries
pub fn push_bounded(alerts: &mut Vec<Alert>, alert: Alert, cap: usize) {
    alerts.insert(0, alert);
    alerts.truncate(cap);
}
