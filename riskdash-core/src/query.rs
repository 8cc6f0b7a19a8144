//! Query and remote-function request/response shapes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BreakdownEntry, DashboardError, SeriesPoint};

/// GraphQL document requesting VaR history for a portfolio
pub const VAR_HISTORY_QUERY: &str = r#"
query VarHistory($portfolioId: ID!, $days: Int!) {
  varHistory(portfolioId: $portfolioId, days: $days) { timestamp value }
}
"#;

/// GraphQL document requesting the per-sector risk breakdown
pub const RISK_BREAKDOWN_QUERY: &str = r#"
query RiskBreakdown($portfolioId: ID!) {
  riskBreakdown(portfolioId: $portfolioId) { category exposure varContribution weight }
}
"#;

/// An opaque query document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryDescriptor(String);

impl QueryDescriptor {
    pub fn new(document: impl Into<String>) -> Self {
        Self(document.into())
    }

    pub fn var_history() -> Self {
        Self::new(VAR_HISTORY_QUERY)
    }

    pub fn risk_breakdown() -> Self {
        Self::new(RISK_BREAKDOWN_QUERY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify the document by the root field it selects
    pub fn shape(&self) -> Option<QueryShape> {
        if self.0.contains("varHistory") {
            Some(QueryShape::TimeSeries)
        } else if self.0.contains("riskBreakdown") {
            Some(QueryShape::Breakdown)
        } else {
            None
        }
    }
}

/// Result-shaping branches a query engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    TimeSeries,
    Breakdown,
}

/// Result of a query; unknown shapes produce `Empty`, never an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueryResult {
    TimeSeries(Vec<SeriesPoint>),
    Breakdown(Vec<BreakdownEntry>),
    Empty,
}

impl QueryResult {
    pub fn into_series(self) -> Option<Vec<SeriesPoint>> {
        match self {
            QueryResult::TimeSeries(points) => Some(points),
            _ => None,
        }
    }

    pub fn into_breakdown(self) -> Option<Vec<BreakdownEntry>> {
        match self {
            QueryResult::Breakdown(entries) => Some(entries),
            _ => None,
        }
    }
}

/// Named remote functions the invoker dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteFunction {
    AlertProcessor,
    PortfolioAnalyzer,
    RiskCalculator,
}

impl RemoteFunction {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteFunction::AlertProcessor => "ALERT_PROCESSOR",
            RemoteFunction::PortfolioAnalyzer => "PORTFOLIO_ANALYZER",
            RemoteFunction::RiskCalculator => "RISK_CALCULATOR",
        }
    }
}

impl fmt::Display for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for RemoteFunction {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALERT_PROCESSOR" => Ok(RemoteFunction::AlertProcessor),
            "PORTFOLIO_ANALYZER" => Ok(RemoteFunction::PortfolioAnalyzer),
            "RISK_CALCULATOR" => Ok(RemoteFunction::RiskCalculator),
            other => Err(DashboardError::unknown_operation(other)),
        }
    }
}

/// Response of a remote function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl InvokeResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_shape() {
        assert_eq!(QueryDescriptor::var_history().shape(), Some(QueryShape::TimeSeries));
        assert_eq!(QueryDescriptor::risk_breakdown().shape(), Some(QueryShape::Breakdown));
        assert_eq!(QueryDescriptor::new("query { positions { id } }").shape(), None);
    }

    #[test]
    fn test_remote_function_parse() {
        assert_eq!(
            "ALERT_PROCESSOR".parse::<RemoteFunction>().unwrap(),
            RemoteFunction::AlertProcessor
        );
        let err = "NOT_A_FUNCTION".parse::<RemoteFunction>().unwrap_err();
        assert_eq!(err, DashboardError::UnknownOperation("NOT_A_FUNCTION".to_string()));
    }

    #[test]
    fn test_invoke_response_success_range() {
        assert!(InvokeResponse::ok(serde_json::Value::Null).is_success());
        let failed = InvokeResponse {
            status_code: 502,
            body: serde_json::Value::Null,
        };
        assert!(!failed.is_success());
    }
}
