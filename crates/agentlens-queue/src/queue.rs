//! Ingest queue contract (spec §4.3, C3). One entry per ingest batch: a
//! tenant's `IngestEvent`s land here as soon as they pass validation, and
//! the batch writer (`writer.rs`, C4) drains them independently of the
//! HTTP request that produced them.

use agentlens_types::IngestEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is at capacity ({0} items)")]
    Backpressure(usize),
    #[error("entry not found")]
    NotFound,
}

/// One batch of events awaiting the write path, tagged with retry state.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub events: Vec<IngestEvent>,
    pub enqueued_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Priority ordering for the in-memory backend's ready-heap: earliest
/// `run_at` sorts first (teacher's `memory.rs` `PriorityEntry`).
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct ReadyKey {
    pub run_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other.run_at.cmp(&self.run_at)
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Default backpressure threshold (spec §4.3): once this many entries sit
/// in the main queue, ingest requests are rejected with 503 until it
/// drains. Overridable via `AGENTLENS_QUEUE_MAX_DEPTH`.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 100_000;

/// Default maximum delivery attempts before an entry moves to the DLQ.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub fn exponential_backoff(attempt: u32) -> Duration {
    Duration::seconds(2_i64.saturating_pow(attempt.min(6)))
}

#[async_trait]
pub trait IngestQueue: Send + Sync {
    /// Enqueue one tenant's batch, rejecting with `Backpressure` if the
    /// queue is already at `max_depth`.
    async fn publish(&self, tenant_id: &str, events: Vec<IngestEvent>, max_depth: usize) -> Result<Uuid, QueueError>;

    /// Pull the next ready batch (`run_at <= now`), marking it in-flight.
    async fn read_batch(&self) -> Option<QueueEntry>;

    /// Acknowledge successful processing, removing the entry.
    async fn ack(&self, id: Uuid);

    /// Re-queue with backoff after a transient failure, or move to the DLQ
    /// once `attempts` exceeds `max_retries`.
    async fn retry_or_dlq(&self, id: Uuid, error: String, max_retries: u32);

    /// Current number of entries awaiting processing (for backpressure
    /// checks and `/health` reporting).
    async fn len(&self) -> usize;

    /// Entries that exhausted their retries.
    async fn dead_letters(&self) -> Vec<QueueEntry>;
}
