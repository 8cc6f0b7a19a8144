//! Topic Event Bus
//!
//! Named-topic publish/subscribe multiplexer. Delivery is synchronous and in
//! subscription order; a faulting subscriber never blocks the others.

use dashmap::DashMap;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use riskdash_core::{DashboardError, DomainEvent};

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Returned by [`EventBus::subscribe`]; pass it back to detach
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

type Handler<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber<T> {
    id: SubscriptionId,
    handler: Handler<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Outcome of a single publish
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Handlers that completed without fault
    pub delivered: usize,
    /// One `HandlerFault` per failing handler
    pub faults: Vec<DashboardError>,
}

/// Bus counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub faults: u64,
}

/// Publish/subscribe multiplexer keyed by topic name
pub struct EventBus<T = DomainEvent> {
    next_subscription_id: AtomicU64,
    /// Topic -> subscribers in registration order
    topics: DashMap<String, Vec<Subscriber<T>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    faults: AtomicU64,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            next_subscription_id: AtomicU64::new(1),
            topics: DashMap::new(),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    /// Register `handler` for `topic`
    ///
    /// Handlers are called in registration order. A handler that returns an
    /// error or panics is reported as a fault and skipped.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::SeqCst));

        self.topics.entry(topic.clone()).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });

        debug!("[EventBus] {} subscribed to {}", id, topic);
        SubscriptionHandle { id, topic }
    }

    /// Detach a subscription; returns `false` if it was already detached
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut removed = false;

        if let Some(mut subscribers) = self.topics.get_mut(&handle.topic) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != handle.id);
            removed = subscribers.len() != before;

            if subscribers.is_empty() {
                drop(subscribers);
                self.topics.remove_if(&handle.topic, |_, subs| subs.is_empty());
            }
        }

        if removed {
            debug!("[EventBus] {} unsubscribed from {}", handle.id, handle.topic);
        }
        removed
    }

    /// Deliver `payload` to every handler registered for `topic` right now
    ///
    /// The subscriber list is copied before delivery, so handlers added by a
    /// handler during this call only see later publishes.
    pub fn publish(&self, topic: &str, payload: &T) -> PublishReport {
        self.published.fetch_add(1, Ordering::Relaxed);

        let subscribers: Vec<Subscriber<T>> = match self.topics.get(topic) {
            Some(subs) => subs.value().clone(),
            None => Vec::new(),
        };

        let mut report = PublishReport::default();
        for subscriber in &subscribers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(payload)));
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            match fault {
                None => report.delivered += 1,
                Some(message) => {
                    warn!(
                        "[EventBus] Handler {} on {} faulted: {}",
                        subscriber.id, topic, message
                    );
                    report.faults.push(DashboardError::handler_fault(topic, message));
                }
            }
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.faults
            .fetch_add(report.faults.len() as u64, Ordering::Relaxed);
        report
    }

    /// Number of handlers registered for `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Total registrations across all topics
    pub fn total_subscriptions(&self) -> usize {
        self.topics.iter().map(|entry| entry.value().len()).sum()
    }

    /// Topics with at least one subscriber
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

impl EventBus<DomainEvent> {
    /// Publish an event on its own topic
    pub fn publish_event(&self, event: &DomainEvent) -> PublishReport {
        self.publish(event.topic(), event)
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.len())
            .field("total_subscriptions", &self.total_subscriptions())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
