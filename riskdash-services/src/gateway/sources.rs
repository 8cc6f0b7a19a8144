//! Capability seams consumed by the gateway
//!
//! Each trait is an independent collaborator: production wires real
//! HTTP/GraphQL/function/DB clients here, tests swap in failing or counting
//! doubles one capability at a time.

use async_trait::async_trait;

use riskdash_core::{
    DashboardResult, InvokeResponse, MetricsRecord, QueryDescriptor, QueryResult, RemoteFunction,
    ServiceHealthCheck,
};

/// Remote real-time metrics endpoint
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_metrics(&self, portfolio_id: &str) -> DashboardResult<MetricsRecord>;
}

/// Query execution backend (GraphQL-style documents)
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Unrecognised descriptors must yield `QueryResult::Empty`, not an error
    async fn execute(
        &self,
        query: &QueryDescriptor,
        variables: &serde_json::Value,
    ) -> DashboardResult<QueryResult>;
}

/// Remote function invocation backend
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(
        &self,
        function: RemoteFunction,
        payload: &serde_json::Value,
    ) -> DashboardResult<InvokeResponse>;
}

/// Health probe for a single service
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, service_name: &str, endpoint: &str)
        -> DashboardResult<ServiceHealthCheck>;
}
