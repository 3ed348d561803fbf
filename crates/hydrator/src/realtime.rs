//! Realtime event seam and an in-process hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::HydrateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub topic: String,
    pub action: RealtimeAction,
    pub record: Value,
}

/// Records on `topic` whose `field` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionPattern {
    pub topic: String,
    pub field: String,
    pub value: String,
}

impl SubscriptionPattern {
    pub fn new(topic: &str, field: &str, value: &str) -> Self {
        Self { topic: topic.to_string(), field: field.to_string(), value: value.to_string() }
    }

    pub fn matches(&self, event: &RealtimeEvent) -> bool {
        event.topic == self.topic && event.record.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

pub type EventHandler = Arc<dyn Fn(RealtimeEvent) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Subscription: Send + Sync {
    async fn unsubscribe(self: Box<Self>) -> Result<(), HydrateError>;
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(
        &self, pattern: SubscriptionPattern, handler: EventHandler,
    ) -> Result<Box<dyn Subscription>, HydrateError>;
}

#[derive(Default)]
struct Hub {
    subscribers: RwLock<HashMap<u64, (SubscriptionPattern, EventHandler)>>,
    next_id: AtomicU64,
}

/// In-process realtime hub. [`MemoryRealtime::publish`] delivers an event to
/// every matching subscriber.
#[derive(Clone, Default)]
pub struct MemoryRealtime {
    hub: Arc<Hub>,
}

impl MemoryRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` and return how many handlers received it.
    pub async fn publish(&self, event: RealtimeEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .hub
            .subscribers
            .read()
            .await
            .values()
            .filter(|(pattern, _)| pattern.matches(&event))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(event.clone()).await;
        }
        handlers.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.hub.subscribers.read().await.len()
    }

    pub async fn patterns(&self) -> Vec<SubscriptionPattern> {
        self.hub
            .subscribers
            .read()
            .await
            .values()
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }
}

struct MemorySubscription {
    id: u64,
    hub: Arc<Hub>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn unsubscribe(self: Box<Self>) -> Result<(), HydrateError> {
        self.hub.subscribers.write().await.remove(&self.id);
        Ok(())
    }
}

#[async_trait]
impl Realtime for MemoryRealtime {
    async fn subscribe(
        &self, pattern: SubscriptionPattern, handler: EventHandler,
    ) -> Result<Box<dyn Subscription>, HydrateError> {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(topic = pattern.topic, field = pattern.field, "realtime subscribe");
        self.hub.subscribers.write().await.insert(id, (pattern, handler));
        Ok(Box::new(MemorySubscription { id, hub: self.hub.clone() }))
    }
}
