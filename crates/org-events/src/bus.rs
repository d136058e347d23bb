//! Publish/subscribe for lifecycle events
//!
//! [`EventBus`] is the seam the engine publishes through. [`MemoryEventBus`]
//! fans events out to in-process subscribers and handlers; a broker-backed
//! bus can implement the same trait.

use crate::types::Event;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[cfg(feature = "memory")]
use std::collections::HashMap;
#[cfg(feature = "memory")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "memory")]
use tokio::sync::RwLock;

/// Failures of the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The transport refused the event
    #[error("Event publication failed: {0}")]
    Publish(String),

    /// A typed event could not be turned into JSON
    #[error("Event payload could not be serialized: {0}")]
    SerializationError(String),

    /// Every sender for the subscription is gone
    #[error("Event channel closed")]
    ChannelClosed,
}

pub type EventBusResult<T> = Result<T, EventBusError>;

/// Receiving end of a topic-pattern subscription.
pub struct Subscription {
    pub id: String,
    /// Pattern the subscription was made with
    pub topic: String,
    pub receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Wait for the next matching event.
    ///
    /// A subscriber that falls behind the channel capacity loses the oldest
    /// events; the loss is logged and receiving continues.
    pub async fn recv(&mut self) -> EventBusResult<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscription = %self.id, skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::ChannelClosed),
            }
        }
    }
}

/// Asynchronous consumer, e.g. invitation email delivery.
///
/// Handlers run on their own task; a failing handler is logged and never
/// affects the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> EventBusResult<()>;

    /// Topic patterns routed to this handler.
    fn topics(&self) -> Vec<String>;
}

/// Lifecycle event transport.
///
/// Patterns are dotted topics where `*` stands for one segment and `#` for
/// any number of segments, so `invitation.*` sees every invitation event and
/// `#` sees everything.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription>;

    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()>;

    /// Drop a subscription by id. Unknown ids are ignored.
    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()>;

    async fn stats(&self) -> EventBusStats;
}

/// Counters reported by [`EventBus::stats`].
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub events_published: u64,
    /// Deliveries to subscribers plus successful handler runs
    pub events_delivered: u64,
    pub active_subscriptions: usize,
    pub registered_handlers: usize,
}

/// Check if a dotted topic matches a dotted pattern.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    segments_match(&pattern, &topic)
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    match (pattern.split_first(), topic.split_first()) {
        (None, None) => true,
        (Some((head, rest)), _) if *head == "#" => {
            segments_match(rest, topic) || (!topic.is_empty() && segments_match(pattern, &topic[1..]))
        }
        (Some((head, rest)), Some((segment, topic_rest))) => {
            (*head == "*" || head == segment) && segments_match(rest, topic_rest)
        }
        _ => false,
    }
}

/// Broadcast-channel bus for a single process.
///
/// One channel per distinct subscription pattern; publishing walks the
/// patterns and sends to every channel whose pattern matches.
#[cfg(feature = "memory")]
pub struct MemoryEventBus {
    subscribers: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    /// subscription id -> pattern
    subscriptions: RwLock<HashMap<String, String>>,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    events_published: AtomicU64,
    events_delivered: Arc<AtomicU64>,
    channel_capacity: usize,
}

#[cfg(feature = "memory")]
impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

#[cfg(feature = "memory")]
impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Bus whose per-pattern channels buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            events_published: AtomicU64::new(0),
            events_delivered: Arc::new(AtomicU64::new(0)),
            channel_capacity: capacity,
        }
    }
}

#[cfg(feature = "memory")]
impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "memory")]
#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        {
            let subscribers = self.subscribers.read().await;
            for (pattern, sender) in subscribers.iter() {
                if topic_matches(pattern, event.topic()) && sender.send(event.clone()).is_ok() {
                    self.events_delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            if !handler.topics().iter().any(|t| topic_matches(t, event.topic())) {
                continue;
            }
            let handler = handler.clone();
            let event = event.clone();
            let delivered = self.events_delivered.clone();
            tokio::spawn(async move {
                let event_type = event.event_type.clone();
                match handler.handle(event).await {
                    Ok(()) => {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!(error = %e, event_type = %event_type, "Event handler failed"),
                }
            });
        }

        tracing::debug!(topic = %event.topic(), event_id = %event.id, "Published event");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription> {
        let id = uuid::Uuid::now_v7().to_string();

        let receiver = {
            let mut subscribers = self.subscribers.write().await;
            match subscribers.get(topic) {
                Some(sender) => sender.subscribe(),
                None => {
                    let (sender, receiver) = broadcast::channel(self.channel_capacity);
                    subscribers.insert(topic.to_string(), sender);
                    receiver
                }
            }
        };

        self.subscriptions
            .write()
            .await
            .insert(id.clone(), topic.to_string());

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        })
    }

    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()> {
        self.handlers.write().await.push(handler);
        Ok(())
    }

    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()> {
        let pattern = self.subscriptions.write().await.remove(subscription_id);
        if let Some(pattern) = pattern {
            let still_used = self
                .subscriptions
                .read()
                .await
                .values()
                .any(|p| *p == pattern);
            if !still_used {
                self.subscribers.write().await.remove(&pattern);
            }
        }
        Ok(())
    }

    async fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            active_subscriptions: self.subscriptions.read().await.len(),
            registered_handlers: self.handlers.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InvitationEvent, MemberEvent};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("member.added", "member.added"));
        assert!(topic_matches("member.*", "member.added"));
        assert!(topic_matches("*.added", "member.added"));
        assert!(!topic_matches("member.*", "team.created"));
        assert!(!topic_matches("member", "member.added"));

        assert!(topic_matches("#", "invitation.accepted"));
        assert!(topic_matches("invitation.#", "invitation.accepted"));
        assert!(topic_matches("invitation.#", "invitation"));
        assert!(topic_matches("#.accepted", "invitation.accepted"));
        assert!(!topic_matches("#.declined", "invitation.accepted"));
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_memory_event_bus_publish_subscribe() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe("invitation.*").await.unwrap();

        let event = InvitationEvent::Declined {
            organization_id: Uuid::now_v7(),
            invitation_id: Uuid::now_v7(),
        }
        .to_event()
        .unwrap();
        bus.publish(event.clone()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(received.id, event.id);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_memory_event_bus_filters_topics() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe("team.*").await.unwrap();

        let event = MemberEvent::Removed {
            organization_id: Uuid::now_v7(),
            member_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
        }
        .to_event()
        .unwrap();
        bus.publish(event).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(received.is_err(), "team subscriber must not see member events");
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_stats_and_unsubscribe() {
        let bus = MemoryEventBus::new();
        let sub = bus.subscribe("#").await.unwrap();
        assert_eq!(bus.stats().await.active_subscriptions, 1);

        bus.publish(InvitationEvent::CleanedUp { removed: 0 }.to_event().unwrap())
            .await
            .unwrap();
        let stats = bus.stats().await;
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_delivered, 1);

        bus.unsubscribe(&sub.id).await.unwrap();
        assert_eq!(bus.stats().await.active_subscriptions, 0);
    }
}
