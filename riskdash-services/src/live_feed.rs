//! Live Feed Generator
//!
//! Background producer that synthesizes market ticks (and the occasional risk
//! alert) and publishes them on the event bus. The returned handle stops the
//! producer explicitly or when dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use riskdash_core::{DomainEvent, MarketTick, MARKET_DATA_TOPIC, RISK_ALERTS_TOPIC};

use crate::clock::SharedClock;
use crate::config::LiveFeedSettings;
use crate::event_bus::EventBus;
use crate::gateway::simulation::{alert_from_template, alert_template_count};

/// Symbols the generator quotes by default
const DEFAULT_SYMBOLS: &[&str] = &["AAPL", "MSFT", "NVDA", "JPM", "XOM", "UNH", "TSLA", "SPY"];

/// Partitions spread across `partition_hint`
const PARTITIONS: i32 = 4;

/// Largest per-tick relative price move
const MAX_TICK_MOVE: f64 = 0.002;

/// Shortest tick the background loop accepts
const MIN_TICK: Duration = Duration::from_millis(1);

/// Serialize an event payload, logging and skipping it on failure
fn encode_payload<P: Serialize>(kind: &str, payload: &P) -> Option<serde_json::Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("[LiveFeed] Dropping {} event, payload failed to serialize: {}", kind, e);
            None
        }
    }
}

/// Configuration for the live feed
#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    pub tick: Duration,
    /// Publish an alert every N ticks (0 disables alerts)
    pub alert_every: u64,
    pub symbols: Vec<String>,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            alert_every: 50,
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&LiveFeedSettings> for LiveFeedConfig {
    fn from(settings: &LiveFeedSettings) -> Self {
        Self {
            tick: settings.tick(),
            alert_every: settings.alert_every,
            ..Self::default()
        }
    }
}

/// Synthesizes domain events and publishes them on the bus
pub struct LiveFeedGenerator {
    bus: Arc<EventBus>,
    clock: SharedClock,
    config: LiveFeedConfig,
    sequence: AtomicU64,
    ticks: AtomicU64,
    rng: Mutex<StdRng>,
    /// Last quoted price per symbol (random walk)
    prices: Mutex<HashMap<String, f64>>,
}

impl LiveFeedGenerator {
    pub fn new(bus: Arc<EventBus>, clock: SharedClock, config: LiveFeedConfig) -> Self {
        Self {
            bus,
            clock,
            config,
            sequence: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            rng: Mutex::new(StdRng::from_os_rng()),
            prices: Mutex::new(HashMap::new()),
        }
    }

    /// Use a reproducible random sequence
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Build the next market tick event
    pub fn next_market_event(&self) -> Option<DomainEvent> {
        let (symbol, price, volume, partition) = {
            let mut rng = self.rng.lock();
            let symbol = if self.config.symbols.is_empty() {
                "SPY".to_string()
            } else {
                let index = rng.random_range(0..self.config.symbols.len());
                self.config.symbols[index].clone()
            };

            let mut prices = self.prices.lock();
            let price = prices
                .entry(symbol.clone())
                .or_insert_with(|| rng.random_range(50.0..500.0));
            *price *= 1.0 + rng.random_range(-MAX_TICK_MOVE..MAX_TICK_MOVE);

            (
                symbol,
                *price,
                rng.random_range(100..10_000u64),
                rng.random_range(0..PARTITIONS),
            )
        };

        let tick = MarketTick {
            symbol: symbol.clone(),
            price,
            volume,
        };
        let payload = encode_payload("market", &tick)?;
        Some(DomainEvent::new(
            MARKET_DATA_TOPIC,
            partition,
            self.next_sequence(),
            self.clock.now(),
            symbol,
            payload,
        ))
    }

    /// Build the next risk alert event
    pub fn next_alert_event(&self) -> Option<DomainEvent> {
        let (template, partition) = {
            let mut rng = self.rng.lock();
            (
                rng.random_range(0..alert_template_count()),
                rng.random_range(0..PARTITIONS),
            )
        };
        let now = self.clock.now();
        let alert = alert_from_template(template, now);

        let payload = encode_payload("alert", &alert)?;
        Some(DomainEvent::new(
            RISK_ALERTS_TOPIC,
            partition,
            self.next_sequence(),
            now,
            alert.metric.clone().unwrap_or_default(),
            payload,
        ))
    }

    /// Publish one tick's worth of events, returning how many were published
    pub fn tick(&self) -> usize {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let mut published = 0;

        if let Some(event) = self.next_market_event() {
            self.bus.publish_event(&event);
            published += 1;
        }
        if self.config.alert_every > 0 && tick % self.config.alert_every == 0 {
            if let Some(event) = self.next_alert_event() {
                self.bus.publish_event(&event);
                published += 1;
            }
        }
        published
    }

    /// Total ticks emitted so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Start publishing on a fixed period until the handle is stopped
    pub fn start(self: Arc<Self>) -> LiveFeedHandle {
        info!(
            "[LiveFeed] Starting live feed: {:?} tick, {} symbols",
            self.config.tick,
            self.config.symbols.len()
        );

        let generator = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(generator.config.tick.max(MIN_TICK));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                generator.tick();

                let ticks = generator.ticks();
                if ticks % 600 == 0 {
                    debug!("[LiveFeed] {} ticks published", ticks);
                }
            }
        });

        LiveFeedHandle {
            task,
            generator: self,
        }
    }
}

impl std::fmt::Debug for LiveFeedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeedGenerator")
            .field("config", &self.config)
            .field("ticks", &self.ticks())
            .finish()
    }
}

/// Stops the generator on [`LiveFeedHandle::stop`] or drop
#[derive(Debug)]
pub struct LiveFeedHandle {
    task: JoinHandle<()>,
    generator: Arc<LiveFeedGenerator>,
}

impl LiveFeedHandle {
    pub fn stop(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            info!(
                "[LiveFeed] Stopped after {} ticks",
                self.generator.ticks()
            );
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn generator(&self) -> &Arc<LiveFeedGenerator> {
        &self.generator
    }
}

impl Drop for LiveFeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
