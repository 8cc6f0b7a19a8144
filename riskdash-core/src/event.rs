//! Push events carried on the topic bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic carrying synthesized market ticks
pub const MARKET_DATA_TOPIC: &str = "market-data";

/// Topic carrying risk alerts
pub const RISK_ALERTS_TOPIC: &str = "risk-alerts";

/// An immutable event published on a topic
///
/// Fields are private so an event cannot be altered after construction;
/// producers build it with [`DomainEvent::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    topic: String,
    partition_hint: i32,
    sequence: u64,
    emitted_at: DateTime<Utc>,
    key: String,
    payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(
        topic: impl Into<String>,
        partition_hint: i32,
        sequence: u64,
        emitted_at: DateTime<Utc>,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition_hint,
            sequence,
            emitted_at,
            key: key.into(),
            payload,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_hint(&self) -> i32 {
        self.partition_hint
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Market tick payload published on [`MARKET_DATA_TOPIC`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_accessors() {
        let now = Utc::now();
        let event = DomainEvent::new(
            MARKET_DATA_TOPIC,
            2,
            7,
            now,
            "AAPL",
            json!({"symbol": "AAPL", "price": 190.5, "volume": 1200}),
        );

        assert_eq!(event.topic(), "market-data");
        assert_eq!(event.partition_hint(), 2);
        assert_eq!(event.sequence(), 7);
        assert_eq!(event.emitted_at(), now);
        assert_eq!(event.key(), "AAPL");

        let tick: MarketTick = serde_json::from_value(event.payload().clone()).unwrap();
        assert_eq!(tick.symbol, "AAPL");
        assert_eq!(tick.volume, 1200);
    }
}
