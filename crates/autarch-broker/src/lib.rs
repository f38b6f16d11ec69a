//! Event Broker (spec §4.B): in-process typed pub/sub with bounded
//! per-subscriber delivery and a diagnostic retained ring buffer.
//!
//! Modeled on the teacher's `SkillRegistry`/`Gater` concurrency shape
//! (`pagi-core/src/orchestrator/mod.rs`): a `DashMap` of independently
//! locked per-entity state rather than one global mutex, so publish on one
//! subscriber never blocks delivery to another.

mod error;
mod subscription;

pub use error::BrokerError;
pub use subscription::Subscriber;

use autarch_types::{random_id, Event, EventType, TypeFilter};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Opaque handle returned by [`EventBroker::subscribe`]; pass back to
/// [`EventBroker::unsubscribe`] to end the stream.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pub subscription_id: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BrokerStats {
    pub total_events: u64,
    pub by_type: std::collections::HashMap<String, u64>,
    pub active_subscribers: usize,
    pub recent: Vec<Event>,
}

pub struct EventBroker {
    next_id: AtomicU64,
    subscribers: DashMap<String, Arc<Subscriber>>,
    subscriber_queue_size: usize,
    retained: Mutex<VecDeque<Event>>,
    retained_capacity: usize,
    total_events: AtomicU64,
    by_type: DashMap<EventType, u64>,
    system_alert_threshold: u64,
}

impl EventBroker {
    pub fn new(subscriber_queue_size: usize, retained_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: DashMap::new(),
            subscriber_queue_size,
            retained: Mutex::new(VecDeque::with_capacity(retained_capacity)),
            retained_capacity,
            total_events: AtomicU64::new(0),
            by_type: DashMap::new(),
            system_alert_threshold: 50,
        }
    }

    /// Assigns a monotonic id, timestamps the event, fans it out to every
    /// subscriber whose filter matches, and appends it to the retained
    /// ring buffer. Never blocks on a slow subscriber.
    pub fn publish(&self, event_type: EventType, data: serde_json::Value, priority: i32) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            event_type,
            data,
            timestamp: Utc::now(),
            priority,
        };

        self.total_events.fetch_add(1, Ordering::Relaxed);
        *self.by_type.entry(event_type).or_insert(0) += 1;

        {
            let mut retained = self.retained.lock().unwrap();
            if retained.len() >= self.retained_capacity {
                retained.pop_front();
            }
            retained.push_back(event.clone());
        }

        let mut alerting_subscribers = Vec::new();
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if sub.type_filter.matches(event_type) {
                sub.offer(event.clone());
                if sub.drop_count() > 0 && sub.drop_count() % self.system_alert_threshold == 0 {
                    alerting_subscribers.push(sub.subscriber_id.clone());
                }
            }
        }

        for subscriber_id in alerting_subscribers {
            warn!(subscriber_id, "subscriber drop count crossed alert threshold");
            self.publish_system_alert(&subscriber_id);
        }

        info!(id, ?event_type, priority, "event published");
        id
    }

    /// Raises a `system_alert` (priority 10) without recursing through the
    /// public `publish` alert-threshold check.
    fn publish_system_alert(&self, subscriber_id: &str) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            event_type: EventType::SystemAlert,
            data: serde_json::json!({ "reason": "subscriber_backpressure", "subscriber_id": subscriber_id }),
            timestamp: Utc::now(),
            priority: EventType::SystemAlert.default_priority(),
        };
        self.total_events.fetch_add(1, Ordering::Relaxed);
        *self.by_type.entry(EventType::SystemAlert).or_insert(0) += 1;
        let mut retained = self.retained.lock().unwrap();
        if retained.len() >= self.retained_capacity {
            retained.pop_front();
        }
        retained.push_back(event.clone());
        drop(retained);
        for entry in self.subscribers.iter() {
            if entry.value().type_filter.matches(EventType::SystemAlert) {
                entry.value().offer(event.clone());
            }
        }
    }

    pub fn subscribe(&self, subscriber_id: impl Into<String>, type_filter: TypeFilter) -> SubscriptionHandle {
        let subscription_id = random_id();
        let subscriber = Arc::new(Subscriber::new(
            subscriber_id.into(),
            type_filter,
            self.subscriber_queue_size,
        ));
        self.subscribers.insert(subscription_id.clone(), subscriber);
        SubscriptionHandle { subscription_id }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError> {
        self.subscribers
            .remove(&handle.subscription_id)
            .map(|_| ())
            .ok_or(BrokerError::UnknownSubscription)
    }

    /// Returns the subscriber handle for awaiting delivered events, or
    /// `None` if the subscription was already removed.
    pub fn subscriber(&self, handle: &SubscriptionHandle) -> Option<Arc<Subscriber>> {
        self.subscribers.get(&handle.subscription_id).map(|e| e.clone())
    }

    pub fn stats(&self) -> BrokerStats {
        let by_type = self
            .by_type
            .iter()
            .map(|e| (format!("{:?}", e.key()), *e.value()))
            .collect();
        let recent = self.retained.lock().unwrap().iter().cloned().collect();
        BrokerStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            by_type,
            active_subscribers: self.subscribers.len(),
            recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_matching_subscriber_only() {
        let broker = EventBroker::new(16, 100);
        let sub = broker.subscribe("client-1", TypeFilter::Only(EventType::ToolExecuted));
        broker.publish(EventType::NodeRegistered, serde_json::json!({}), 5);
        broker.publish(EventType::ToolExecuted, serde_json::json!({"tool": "echo"}), 3);

        let subscriber = broker.subscriber(&sub).unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_millis(100), subscriber.recv())
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::ToolExecuted);
    }

    #[tokio::test]
    async fn higher_priority_delivered_before_lower() {
        let broker = EventBroker::new(16, 100);
        let sub = broker.subscribe("client-1", TypeFilter::All);
        broker.publish(EventType::ToolExecuted, serde_json::json!({}), 3);
        broker.publish(EventType::EvolutionApplied, serde_json::json!({}), 8);

        let subscriber = broker.subscriber(&sub).unwrap();
        let first = subscriber.recv().await;
        assert_eq!(first.event_type, EventType::EvolutionApplied);
        let second = subscriber.recv().await;
        assert_eq!(second.event_type, EventType::ToolExecuted);
    }

    #[tokio::test]
    async fn full_queue_drops_lowest_priority_and_counts_it() {
        let broker = EventBroker::new(2, 100);
        let sub = broker.subscribe("client-1", TypeFilter::All);
        broker.publish(EventType::ToolExecuted, serde_json::json!({}), 1);
        broker.publish(EventType::ToolExecuted, serde_json::json!({}), 2);
        broker.publish(EventType::EvolutionApplied, serde_json::json!({}), 8);

        let subscriber = broker.subscriber(&sub).unwrap();
        assert_eq!(subscriber.drop_count(), 1);
        let first = subscriber.recv().await;
        assert_eq!(first.priority, 8);
        let second = subscriber.recv().await;
        assert_eq!(second.priority, 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_errors_on_repeat() {
        let broker = EventBroker::new(16, 100);
        let sub = broker.subscribe("client-1", TypeFilter::All);
        broker.unsubscribe(&sub).unwrap();
        assert!(broker.subscriber(&sub).is_none());
        assert!(matches!(broker.unsubscribe(&sub), Err(BrokerError::UnknownSubscription)));
    }

    #[test]
    fn stats_reports_totals_and_recent() {
        let broker = EventBroker::new(16, 2);
        broker.publish(EventType::ToolExecuted, serde_json::json!({}), 3);
        broker.publish(EventType::ToolExecuted, serde_json::json!({}), 3);
        broker.publish(EventType::ToolExecuted, serde_json::json!({}), 3);
        let stats = broker.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.recent.len(), 2);
    }
}
