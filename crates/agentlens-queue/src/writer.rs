//! Batch writer (spec §4.4, C4): drains `IngestQueue`, enriches each event
//! with model cost, hash-chains it, and persists through `agentlens-store`.
//! One tenant group's failure is isolated via a `tokio::spawn`ed task per
//! group (teacher's `worker.rs` per-job-spawn idiom, narrowed to per-batch).

use agentlens_store::Store;
use agentlens_types::{Agent, AgentLensError, Event, EventType, Session, SessionStatus, Severity};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ulid::Ulid;

use crate::queue::IngestQueue;

/// USD-per-million-token rate card for one model family.
#[derive(Debug, Clone, Copy)]
struct ModelRate {
    prefix: &'static str,
    input: f64,
    output: f64,
    cache_read: f64,
    cache_write: f64,
}

/// Prefix-matched model cost table. Longest matching prefix wins; a model
/// with no match contributes zero cost rather than erroring (spec §4.4).
const MODEL_COSTS: &[ModelRate] = &[
    ModelRate { prefix: "claude-3-5-sonnet", input: 3.0, output: 15.0, cache_read: 0.3, cache_write: 3.75 },
    ModelRate { prefix: "claude-3-5-haiku", input: 0.8, output: 4.0, cache_read: 0.08, cache_write: 1.0 },
    ModelRate { prefix: "claude-3-opus", input: 15.0, output: 75.0, cache_read: 1.5, cache_write: 18.75 },
    ModelRate { prefix: "claude-3-haiku", input: 0.25, output: 1.25, cache_read: 0.03, cache_write: 0.3 },
    ModelRate { prefix: "claude-3", input: 3.0, output: 15.0, cache_read: 0.3, cache_write: 3.75 },
    ModelRate { prefix: "gpt-4o-mini", input: 0.15, output: 0.6, cache_read: 0.075, cache_write: 0.0 },
    ModelRate { prefix: "gpt-4o", input: 2.5, output: 10.0, cache_read: 1.25, cache_write: 0.0 },
    ModelRate { prefix: "gpt-4", input: 30.0, output: 60.0, cache_read: 0.0, cache_write: 0.0 },
    ModelRate { prefix: "gpt-3.5", input: 0.5, output: 1.5, cache_read: 0.0, cache_write: 0.0 },
    ModelRate { prefix: "gemini-1.5-pro", input: 1.25, output: 5.0, cache_read: 0.3125, cache_write: 0.0 },
    ModelRate { prefix: "gemini-1.5-flash", input: 0.075, output: 0.3, cache_read: 0.01875, cache_write: 0.0 },
];

fn lookup_rate(model: &str) -> Option<&'static ModelRate> {
    MODEL_COSTS
        .iter()
        .filter(|r| model.starts_with(r.prefix))
        .max_by_key(|r| r.prefix.len())
}

/// Reads token/model fields off an event payload and, if the model is
/// recognized, writes `costUsd` back into the payload. Returns the computed
/// cost (0.0 if the payload declares no tokens or an unrecognized model).
fn enrich_cost(payload: &mut serde_json::Value) -> f64 {
    let Some(obj) = payload.as_object_mut() else { return 0.0 };
    let model = obj.get("model").and_then(|v| v.as_str()).map(str::to_owned);
    let input = obj.get("inputTokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output = obj.get("outputTokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let cache_read = obj.get("cacheReadTokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let cache_write = obj.get("cacheWriteTokens").and_then(|v| v.as_u64()).unwrap_or(0);

    if input == 0 && output == 0 && cache_read == 0 && cache_write == 0 {
        return 0.0;
    }

    let Some(model) = model else { return 0.0 };
    let Some(rate) = lookup_rate(&model) else { return 0.0 };

    let uncached_input = input.saturating_sub(cache_read).saturating_sub(cache_write);
    let cost = (uncached_input as f64 * rate.input
        + output as f64 * rate.output
        + cache_read as f64 * rate.cache_read
        + cache_write as f64 * rate.cache_write)
        / 1_000_000.0;

    obj.insert("costUsd".to_string(), serde_json::json!(cost));
    cost
}

#[derive(Debug, Default)]
pub struct WriterStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub dlqd: AtomicU64,
}

impl WriterStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.dlqd.load(Ordering::Relaxed),
        )
    }
}

pub struct BatchWriter {
    queue: Arc<dyn IngestQueue>,
    store: Arc<dyn Store>,
    batch_size: usize,
    max_retries: u32,
    stats: Arc<WriterStats>,
}

impl BatchWriter {
    pub fn new(queue: Arc<dyn IngestQueue>, store: Arc<dyn Store>) -> Self {
        Self {
            queue,
            store,
            batch_size: 500,
            max_retries: crate::queue::DEFAULT_MAX_RETRIES,
            stats: Arc::new(WriterStats::default()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        self.stats.clone()
    }

    /// Drain up to `batch_size` ready entries, processing each tenant group
    /// on its own task so one group's failure can't poison another's.
    pub async fn run_once(&self) -> usize {
        let mut handles = Vec::new();
        for _ in 0..self.batch_size {
            let Some(entry) = self.queue.read_batch().await else { break };
            let store = self.store.clone();
            let queue = self.queue.clone();
            let stats = self.stats.clone();
            let max_retries = self.max_retries;
            handles.push(tokio::spawn(async move {
                match write_group(&*store, &entry.events, &entry.tenant_id).await {
                    Ok(()) => {
                        queue.ack(entry.id).await;
                        stats.processed.fetch_add(entry.events.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        let was_final = entry.attempts + 1 > max_retries;
                        queue.retry_or_dlq(entry.id, e.to_string(), max_retries).await;
                        if was_final {
                            stats.dlqd.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }));
        }
        let n = handles.len();
        for h in handles {
            let _ = h.await;
        }
        n
    }

    /// Runs `run_once` on an interval until the queue stays empty for one
    /// tick; intended for tests and the CLI's one-shot drain mode. The
    /// server wires this into a long-lived ticker instead (spec §5).
    pub async fn drain(&self) -> (u64, u64, u64) {
        loop {
            let n = self.run_once().await;
            if n == 0 {
                break;
            }
        }
        self.stats.snapshot()
    }
}

async fn write_group(store: &dyn Store, events: &[agentlens_types::IngestEvent], tenant_id: &str) -> agentlens_types::Result<()> {
    for ingest in events {
        let event_type = EventType::parse(&ingest.event_type)
            .ok_or_else(|| AgentLensError::validation(format!("unknown event_type: {}", ingest.event_type)))?;
        let severity = ingest
            .severity
            .as_deref()
            .map(|s| Severity::parse(s).ok_or_else(|| AgentLensError::validation(format!("unknown severity: {s}"))))
            .transpose()?
            .unwrap_or_default();

        let mut payload = ingest.payload.clone();
        agentlens_types::Event::truncate_payload(&mut payload);
        enrich_cost(&mut payload);

        let lock = store.session_lock(tenant_id, &ingest.session_id).await;
        let _guard = lock.lock().await;

        let prev_hash = store.last_event_hash(tenant_id, &ingest.session_id).await?;
        let timestamp = ingest.timestamp.unwrap_or_else(chrono::Utc::now);

        let mut event = Event {
            id: Ulid::new(),
            tenant_id: tenant_id.to_string(),
            timestamp,
            session_id: ingest.session_id.clone(),
            agent_id: ingest.agent_id.clone(),
            event_type,
            severity,
            payload,
            metadata: ingest.metadata.clone(),
            prev_hash,
            hash: String::new(),
        };
        event.hash = event.compute_hash();

        store.append_event(&event).await?;
        roll_forward_aggregates(store, &event).await?;
    }
    Ok(())
}

async fn roll_forward_aggregates(store: &dyn Store, event: &Event) -> agentlens_types::Result<()> {
    let mut session = match store.get_session(&event.tenant_id, &event.session_id).await? {
        Some(s) => s,
        None => Session::new(&event.tenant_id, &event.session_id, &event.agent_id, event.timestamp),
    };

    session.aggregates.event_count += 1;
    match event.event_type {
        EventType::ToolCall => session.aggregates.tool_call_count += 1,
        EventType::LlmCall | EventType::LlmResponse => session.aggregates.llm_call_count += 1,
        _ => {}
    }
    if event.severity.is_failure() || event.event_type == EventType::ToolError {
        session.aggregates.error_count += 1;
    }
    if let Some(obj) = event.payload.as_object() {
        if let Some(t) = obj.get("inputTokens").and_then(|v| v.as_u64()) {
            session.aggregates.total_input_tokens += t;
        }
        if let Some(t) = obj.get("outputTokens").and_then(|v| v.as_u64()) {
            session.aggregates.total_output_tokens += t;
        }
        if let Some(c) = obj.get("costUsd").and_then(|v| v.as_f64()) {
            session.aggregates.total_cost_usd += c;
        }
    }
    match event.event_type {
        EventType::SessionEnded => {
            session.ended_at = Some(event.timestamp);
            session.status = SessionStatus::Completed;
        }
        _ if event.severity == Severity::Critical => session.status = SessionStatus::Error,
        _ => {}
    }

    let is_new_session = session.aggregates.event_count == 1;
    store.upsert_session(&session).await?;

    let mut agent = match store.get_agent(&event.tenant_id, &event.agent_id).await? {
        Some(a) => a,
        None => Agent::new(&event.tenant_id, &event.agent_id, event.timestamp),
    };
    agent.last_seen_at = event.timestamp;
    if is_new_session {
        agent.session_count += 1;
    }
    store.upsert_agent(&agent).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;
    use agentlens_store::MemoryStore;

    fn ingest(session_id: &str, event_type: &str, payload: serde_json::Value) -> agentlens_types::IngestEvent {
        serde_json::from_value(serde_json::json!({
            "session_id": session_id,
            "agent_id": "a1",
            "event_type": event_type,
            "payload": payload
        }))
        .unwrap()
    }

    #[test]
    fn cost_lookup_matches_longest_prefix() {
        let rate = lookup_rate("claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(rate.prefix, "claude-3-5-sonnet");
    }

    #[test]
    fn enrich_cost_writes_cost_usd() {
        let mut payload = serde_json::json!({
            "model": "gpt-4o",
            "inputTokens": 1000,
            "outputTokens": 500,
        });
        let cost = enrich_cost(&mut payload);
        assert!(cost > 0.0);
        assert_eq!(payload["costUsd"].as_f64().unwrap(), cost);
    }

    #[test]
    fn enrich_cost_unrecognized_model_is_zero() {
        let mut payload = serde_json::json!({"model": "some-custom-model", "inputTokens": 10});
        assert_eq!(enrich_cost(&mut payload), 0.0);
        assert!(payload.get("costUsd").is_none());
    }

    #[tokio::test]
    async fn drains_queue_and_chains_events() {
        let queue: Arc<dyn IngestQueue> = Arc::new(MemoryQueue::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let writer = BatchWriter::new(queue.clone(), store.clone());

        queue
            .publish(
                "t1",
                vec![
                    ingest("s1", "tool_call", serde_json::json!({})),
                    ingest("s1", "llm_response", serde_json::json!({"model": "gpt-4o", "inputTokens": 100, "outputTokens": 50})),
                ],
                10,
            )
            .await
            .unwrap();

        let (processed, failed, dlqd) = writer.drain().await;
        assert_eq!(processed, 2);
        assert_eq!(failed, 0);
        assert_eq!(dlqd, 0);

        let events = store.session_events("t1", "s1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].prev_hash.is_none());
        assert_eq!(events[1].prev_hash, Some(events[0].hash.clone()));

        let session = store.get_session("t1", "s1").await.unwrap().unwrap();
        assert_eq!(session.aggregates.event_count, 2);
        assert_eq!(session.aggregates.llm_call_count, 1);
        assert_eq!(session.aggregates.total_input_tokens, 100);
        assert!(session.aggregates.total_cost_usd > 0.0);
    }

    #[tokio::test]
    async fn unknown_event_type_retries_then_dlqs() {
        let queue: Arc<dyn IngestQueue> = Arc::new(MemoryQueue::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let writer = BatchWriter::new(queue.clone(), store.clone()).with_max_retries(0);

        queue.publish("t1", vec![ingest("s1", "not_a_real_type", serde_json::json!({}))], 10).await.unwrap();
        let (_, failed, dlqd) = writer.drain().await;
        assert_eq!(failed, 1);
        assert_eq!(dlqd, 1);
        assert_eq!(queue.dead_letters().await.len(), 1);
    }
}
