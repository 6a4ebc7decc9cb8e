//! In-process publish/subscribe fan-out
//!
//! Publish is non-blocking: each subscriber has a bounded buffer and an event
//! is dropped for a subscriber whose buffer is full, without affecting the
//! others. Closing a subscription closes its channel exactly once.

use crate::event::RunEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Best-effort persistence hook consumed by the bus
///
/// Implemented by the event store so SSE subscribers can replay backlog.
/// Failures are logged, never propagated to publishers.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn persist(&self, event: &RunEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Identifier handed out by [`EventBus::subscribe`]
pub type SubscriberId = u64;

struct Watcher {
    tx: mpsc::Sender<RunEvent>,
}

/// In-process event fan-out bus
pub struct EventBus {
    watchers: RwLock<HashMap<SubscriberId, Watcher>>,
    next_id: AtomicU64,
    /// Events dropped due to full subscriber buffers
    dropped: AtomicU64,
    persist_tx: RwLock<Option<mpsc::Sender<RunEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            persist_tx: RwLock::new(None),
        }
    }

    /// Attach a persistence sink; every subsequently published event is
    /// forwarded to it on a background task
    pub fn attach_sink(&self, sink: Arc<dyn EventSink>) {
        let (tx, mut rx) = mpsc::channel::<RunEvent>(256);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.persist(&event).await {
                    warn!(run_id = %event.run_id, error = %e, "event persistence failed");
                }
            }
        });
        *self.persist_tx.write() = Some(tx);
    }

    /// Register a subscriber with the given buffer capacity
    pub fn subscribe(&self, buffer: usize) -> (SubscriberId, mpsc::Receiver<RunEvent>) {
        let buffer = buffer.max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers.write().insert(id, Watcher { tx });
        (id, rx)
    }

    /// Remove a subscriber; dropping its sender closes the channel
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.watchers.write().remove(&id);
    }

    /// Publish an event to all subscribers without blocking
    ///
    /// The event is normalized first. A subscriber whose buffer is full
    /// misses this event; the drop is counted and logged at debug level.
    pub fn publish(&self, event: RunEvent) {
        let event = event.normalize();

        if let Some(tx) = self.persist_tx.read().as_ref() {
            // Persistence is best effort; a saturated sink drops too.
            let _ = tx.try_send(event.clone());
        }

        let mut closed = Vec::new();
        {
            let watchers = self.watchers.read();
            for (id, watcher) in watchers.iter() {
                match watcher.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(subscriber = id, name = %event.name, "subscriber buffer full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            let mut watchers = self.watchers.write();
            for id in closed {
                watchers.remove(&id);
            }
        }
    }

    /// Number of currently registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.watchers.read().len()
    }

    /// Total events dropped across all subscribers
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventStatus};

    fn event(name: &str) -> RunEvent {
        RunEvent::new("r1", EventKind::Run, EventStatus::Started, name)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(8);

        bus.publish(event("run.start"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name, "run.start");
        assert!(received.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_isolated() {
        let bus = EventBus::new();
        let (_slow, mut slow_rx) = bus.subscribe(1);
        let (_fast, mut fast_rx) = bus.subscribe(8);

        bus.publish(event("e1"));
        bus.publish(event("e2")); // dropped for the slow subscriber

        assert_eq!(fast_rx.recv().await.unwrap().name, "e1");
        assert_eq!(fast_rx.recv().await.unwrap().name, "e2");

        assert_eq!(slow_rx.recv().await.unwrap().name, "e1");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe(4);
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_purged_on_publish() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe(4);
        drop(rx);

        bus.publish(event("e1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_order_preserved_per_subscriber() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(16);

        for i in 0..10 {
            bus.publish(event(&format!("e{}", i)));
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap().name, format!("e{}", i));
        }
    }
}
