use crate::monitoring::metrics::MetricEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

/// Destination for metric events produced by samplers.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_event(&self, event: &MetricEvent);
}

/// Fan-out of serialized events to every currently registered subscriber.
///
/// Each subscriber owns a bounded queue. Publishing never waits on a
/// subscriber: a full queue loses that one event, a closed queue is
/// dropped from the registry.
pub struct Broadcaster {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next payload, or `None` once the broadcaster dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        self.subscribers.lock().await.insert(id, tx);
        debug!("Subscriber {} registered", id);

        Subscription { id, receiver: rx }
    }

    /// Returns false if the subscription had already been pruned.
    pub async fn unsubscribe(&self, subscription: Subscription) -> bool {
        let removed = self
            .subscribers
            .lock()
            .await
            .remove(&subscription.id)
            .is_some();
        debug!("Subscriber {} removed", subscription.id);
        removed
    }

    /// Delivers `payload` to the subscribers registered right now and
    /// returns how many accepted it.
    pub async fn publish(&self, payload: Arc<str>) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is lagging, event dropped", id);
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
            debug!("Subscriber {} went away", id);
        }

        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[async_trait]
impl EventSink for Broadcaster {
    async fn publish_event(&self, event: &MetricEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                self.publish(Arc::from(json)).await;
            }
            Err(e) => error!("Failed to serialize event from {}: {}", event.name, e),
        }
    }
}
