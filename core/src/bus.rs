// Message bus implementation
//
// In-process pub/sub keyed by MQTT-style topic filters. The MQTT transport
// forwards inbound publishes here and the gateway consumes them from a
// bounded subscription channel. Tests use it as the outbound side too.
use crate::{Result, WavenetError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A message on the bus: topic plus raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Message with a JSON-serialized payload.
    pub fn json<T: Serialize>(topic: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self::new(topic, serde_json::to_vec(body)?))
    }
}

/// Outbound side of a transport
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: BusMessage) -> Result<()>;
}

/// Subscription information
#[derive(Debug, Clone)]
struct Subscription {
    filters: Vec<String>,
    sender: mpsc::Sender<BusMessage>,
}

/// Message bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub active_subscriptions: usize,
    pub dropped_messages: u64,
}

/// In-process message bus
#[derive(Clone, Default)]
pub struct MessageBus {
    // Subscription id -> subscription
    subscriptions: Arc<DashMap<String, Subscription>>,

    // Statistics, keyed by topic
    stats: Arc<DashMap<String, BusStats>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every matching subscription. Waits when a
    /// subscriber's queue is full. Returns the number of deliveries.
    pub async fn dispatch(&self, message: BusMessage) -> u64 {
        debug!(target: "bus", topic = %message.topic, bytes = message.payload.len(), "Publishing message");

        // Collect senders first; never hold a map guard across an await
        let targets: Vec<(String, mpsc::Sender<BusMessage>)> = self
            .subscriptions
            .iter()
            .filter(|sub| {
                sub.value()
                    .filters
                    .iter()
                    .any(|f| topic_matches(f, &message.topic))
            })
            .map(|sub| (sub.key().clone(), sub.value().sender.clone()))
            .collect();

        if targets.is_empty() {
            debug!(target: "bus", topic = %message.topic, "No subscriptions for topic");
        }

        let mut delivered = 0;
        let mut dropped = 0;
        for (id, sender) in targets {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                dropped += 1;
                warn!(target: "bus", subscription = %id, "Subscriber gone; removing subscription");
                self.subscriptions.remove(&id);
            }
        }

        self.update_stats(&message.topic, |stats| {
            stats.total_published += 1;
            stats.total_delivered += delivered;
            stats.dropped_messages += dropped;
        });
        delivered
    }

    /// Subscribe to every topic matching any of `filters`.
    pub fn subscribe(
        &self,
        filters: Vec<String>,
        capacity: usize,
    ) -> (String, mpsc::Receiver<BusMessage>) {
        let subscription_id = format!("sub_{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::channel(capacity.max(1));

        for filter in &filters {
            self.update_stats(filter, |stats| stats.active_subscriptions += 1);
        }
        info!(target: "bus", subscription = %subscription_id, filters = ?filters, "Created subscription");
        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                filters,
                sender: tx,
            },
        );
        (subscription_id, rx)
    }

    pub fn unsubscribe(&self, subscription_id: &str) {
        if let Some((_, sub)) = self.subscriptions.remove(subscription_id) {
            for filter in &sub.filters {
                self.update_stats(filter, |stats| {
                    stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
                });
            }
            info!(target: "bus", subscription = %subscription_id, "Unsubscribed");
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Get stats
    pub fn get_stats(&self, topic: &str) -> Option<BusStats> {
        self.stats.get(topic).map(|s| s.clone())
    }

    fn update_stats<F>(&self, topic: &str, f: F)
    where
        F: FnOnce(&mut BusStats),
    {
        let mut entry = self.stats.entry(topic.to_string()).or_default();
        f(entry.value_mut());
    }
}

#[async_trait]
impl Publisher for MessageBus {
    async fn publish(&self, message: BusMessage) -> Result<()> {
        self.dispatch(message).await;
        Ok(())
    }
}

/// MQTT topic filter matching (`+` one level, `#` the rest).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Reject filters MQTT would refuse (`#` not last, wildcards mixed into a level).
pub fn validate_filter(filter: &str) -> Result<()> {
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let bad_hash = level.contains('#') && (*level != "#" || i + 1 != levels.len());
        let bad_plus = level.contains('+') && *level != "+";
        if filter.is_empty() || bad_hash || bad_plus {
            return Err(WavenetError::Transport(format!(
                "invalid topic filter: {}",
                filter
            )));
        }
    }
    Ok(())
}
