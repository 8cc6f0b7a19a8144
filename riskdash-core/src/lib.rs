//! Core types for the risk dashboard data layer
//!
//! This crate defines the shared data structures used across the dashboard
//! services: risk metrics, alerts, push events, health records and the
//! assembled snapshot.

pub mod alert;
pub mod error;
pub mod event;
pub mod health;
pub mod metrics;
pub mod query;
pub mod snapshot;

pub use alert::{push_bounded, Alert, AlertSeverity};
pub use error::{DashboardError, DashboardResult};
pub use event::{DomainEvent, MarketTick, MARKET_DATA_TOPIC, RISK_ALERTS_TOPIC};
pub use health::{ConnectionState, HealthRecord, ServiceHealthCheck};
pub use metrics::{BreakdownEntry, MetricsRecord, PortfolioAnalysis, SeriesPoint};
pub use query::{
    InvokeResponse, QueryDescriptor, QueryResult, QueryShape, RemoteFunction,
    RISK_BREAKDOWN_QUERY, VAR_HISTORY_QUERY,
};
pub use snapshot::{Snapshot, VAR_SERIES};
