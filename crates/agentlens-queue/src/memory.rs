//! In-memory ingest queue: a priority heap keyed by `run_at` plus a DLQ map,
//! following the teacher's `MemoryQueue` (`BinaryHeap<PriorityEntry>` over a
//! `HashMap` of full entries) with the job-registry machinery stripped out —
//! C3 only ever moves `QueueEntry` batches, never arbitrary job types.

use crate::queue::{IngestQueue, QueueEntry, QueueError, ReadyKey};
use agentlens_types::IngestEvent;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: RwLock<HashMap<Uuid, QueueEntry>>,
    ready: RwLock<BinaryHeap<ReadyKey>>,
    dlq: RwLock<HashMap<Uuid, QueueEntry>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IngestQueue for MemoryQueue {
    async fn publish(&self, tenant_id: &str, events: Vec<IngestEvent>, max_depth: usize) -> Result<Uuid, QueueError> {
        if self.len().await >= max_depth {
            return Err(QueueError::Backpressure(max_depth));
        }
        let id = Uuid::new_v4();
        let now = Utc::now();
        let entry = QueueEntry {
            id,
            tenant_id: tenant_id.to_string(),
            events,
            enqueued_at: now,
            run_at: now,
            attempts: 0,
        };
        self.entries.write().await.insert(id, entry);
        self.ready.write().await.push(ReadyKey { run_at: now, id });
        Ok(id)
    }

    async fn read_batch(&self) -> Option<QueueEntry> {
        let now = Utc::now();
        let mut ready = self.ready.write().await;
        let key = ready.peek()?;
        if key.run_at > now {
            return None;
        }
        let key = ready.pop()?;
        let entries = self.entries.read().await;
        entries.get(&key.id).cloned()
    }

    async fn ack(&self, id: Uuid) {
        self.entries.write().await.remove(&id);
    }

    async fn retry_or_dlq(&self, id: Uuid, error: String, max_retries: u32) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&id) else { return };
        entry.attempts += 1;
        if entry.attempts > max_retries {
            tracing::warn!(queue_entry = %id, tenant_id = %entry.tenant_id, %error, "moving ingest batch to dead letter queue");
            let dead = entries.remove(&id).expect("checked above");
            self.dlq.write().await.insert(id, dead);
        } else {
            let delay = crate::queue::exponential_backoff(entry.attempts);
            entry.run_at = Utc::now() + delay;
            tracing::info!(queue_entry = %id, attempt = entry.attempts, delay_secs = delay.num_seconds(), %error, "retrying ingest batch with backoff");
            drop(entries);
            self.ready.write().await.push(ReadyKey { run_at: Utc::now() + delay, id });
        }
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn dead_letters(&self) -> Vec<QueueEntry> {
        self.dlq.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> IngestEvent {
        serde_json::from_value(serde_json::json!({
            "session_id": "s1",
            "agent_id": "a1",
            "event_type": "tool_call",
            "payload": {}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn publish_and_read_round_trip() {
        let queue = MemoryQueue::new();
        let id = queue.publish("t1", vec![sample_event()], 10).await.unwrap();
        assert_eq!(queue.len().await, 1);

        let entry = queue.read_batch().await.unwrap();
        assert_eq!(entry.id, id);
        queue.ack(id).await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn backpressure_rejects_when_full() {
        let queue = MemoryQueue::new();
        queue.publish("t1", vec![sample_event()], 1).await.unwrap();
        let result = queue.publish("t1", vec![sample_event()], 1).await;
        assert!(matches!(result, Err(QueueError::Backpressure(1))));
    }

    #[tokio::test]
    async fn exhausted_retries_move_to_dlq() {
        let queue = MemoryQueue::new();
        let id = queue.publish("t1", vec![sample_event()], 10).await.unwrap();
        queue.read_batch().await.unwrap();
        for _ in 0..4 {
            queue.retry_or_dlq(id, "boom".into(), 3).await;
        }
        assert!(queue.dead_letters().await.iter().any(|e| e.id == id));
    }
}
