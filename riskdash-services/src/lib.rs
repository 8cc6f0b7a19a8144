//! Service layer for the risk dashboard
//!
//! This crate provides the client-side data layer behind the dashboard:
//! an expiring cache, a topic event bus, the source gateway over the
//! upstream capabilities, a simulated live feed and the dashboard session
//! that aggregates and refreshes everything.

pub mod clock;
pub mod config;
pub mod event_bus;
pub mod expiring_cache;
pub mod gateway;
pub mod live_feed;
pub mod session;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use config::{
    CacheConfig, ConfigError, DashboardConfig, EndpointConfig, IntervalConfig, LiveFeedSettings,
    ServiceEndpoint,
};
pub use event_bus::{BusStats, EventBus, PublishReport, SubscriptionHandle, SubscriptionId};
pub use expiring_cache::{CacheStats, ExpiringCache};
pub use gateway::sources::{FunctionInvoker, HealthProber, MetricsSource, QueryEngine};
pub use gateway::{
    metrics_cache_key, Capability, GatewayStats, RandomizedStrategy, ScriptedStrategy,
    SimulatedBackend, SimulationStrategy, SourceGateway,
};
pub use live_feed::{LiveFeedConfig, LiveFeedGenerator, LiveFeedHandle};
pub use session::{DashboardSession, SessionState, SessionUpdate};
