//! Service health and connection state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one health probe against one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthCheck {
    pub service_name: String,
    pub reachable: bool,
    pub latency_ms: u64,
    pub endpoint: String,
    pub checked_at: DateTime<Utc>,
}

/// Health of every known service from the latest probe round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub services: Vec<ServiceHealthCheck>,
    /// `None` until the first probe round completes
    pub checked_at: Option<DateTime<Utc>>,
}

impl HealthRecord {
    pub fn from_checks(services: Vec<ServiceHealthCheck>, checked_at: DateTime<Utc>) -> Self {
        Self {
            services,
            checked_at: Some(checked_at),
        }
    }

    /// True when at least one probe ran and every probed service answered
    pub fn all_reachable(&self) -> bool {
        !self.services.is_empty() && self.services.iter().all(|s| s.reachable)
    }

    pub fn unreachable(&self) -> impl Iterator<Item = &ServiceHealthCheck> {
        self.services.iter().filter(|s| !s.reachable)
    }
}

/// Coarse connection indicator exposed to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    /// Connected, but at least one service failed its last probe
    Degraded,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, reachable: bool) -> ServiceHealthCheck {
        ServiceHealthCheck {
            service_name: name.to_string(),
            reachable,
            latency_ms: 12,
            endpoint: format!("http://{}.local", name),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_all_reachable() {
        let healthy = HealthRecord::from_checks(vec![check("a", true), check("b", true)], Utc::now());
        assert!(healthy.all_reachable());

        let degraded =
            HealthRecord::from_checks(vec![check("a", true), check("b", false)], Utc::now());
        assert!(!degraded.all_reachable());
        assert_eq!(degraded.unreachable().count(), 1);
    }

    #[test]
    fn test_empty_record_is_not_healthy() {
        assert!(!HealthRecord::default().all_reachable());
    }
}
