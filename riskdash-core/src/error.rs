//! Error types for the dashboard data layer

use thiserror::Error;

/// Dashboard-wide error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DashboardError {
    /// `invoke` was called with a function name outside the known set
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A capability call rejected; owning loops skip the cycle
    #[error("Upstream unavailable ({capability}): {message}")]
    UpstreamUnavailable { capability: String, message: String },

    /// A member of the initial all-or-nothing join failed
    #[error("Aggregate load failed: {0}")]
    AggregateLoadFailure(String),

    /// A topic subscriber returned an error or panicked
    #[error("Handler fault on topic {topic}: {message}")]
    HandlerFault { topic: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DashboardError {
    pub fn unknown_operation(name: impl Into<String>) -> Self {
        DashboardError::UnknownOperation(name.into())
    }

    pub fn upstream(capability: impl Into<String>, message: impl Into<String>) -> Self {
        DashboardError::UpstreamUnavailable {
            capability: capability.into(),
            message: message.into(),
        }
    }

    pub fn aggregate(msg: impl Into<String>) -> Self {
        DashboardError::AggregateLoadFailure(msg.into())
    }

    pub fn handler_fault(topic: impl Into<String>, message: impl Into<String>) -> Self {
        DashboardError::HandlerFault {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        DashboardError::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        DashboardError::Config(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        DashboardError::InvalidState(msg.into())
    }

    /// Whether a refresh loop may swallow this error and retry next cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DashboardError::UpstreamUnavailable { .. } | DashboardError::Parse(_)
        )
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(e: serde_json::Error) -> Self {
        DashboardError::Parse(e.to_string())
    }
}

/// Result type alias for dashboard operations
pub type DashboardResult<T> = Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_is_recoverable() {
        assert!(DashboardError::upstream("metrics", "timeout").is_recoverable());
        assert!(!DashboardError::unknown_operation("NOPE").is_recoverable());
        assert!(!DashboardError::aggregate("query failed").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = DashboardError::upstream("query", "connection refused");
        assert_eq!(
            err.to_string(),
            "Upstream unavailable (query): connection refused"
        );
    }
}
