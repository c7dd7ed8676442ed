//! Ingest pipeline (spec §4.5, C5): validate → truncate → group by session →
//! chain → insert → best-effort side effects (bus publish, embedding
//! enqueue, session-summary enqueue).

use crate::bus::{BusEvent, EventBus};
use crate::embedding::EmbeddingQueue;
use agentlens_store::Store;
use agentlens_types::{
    Agent, AgentLensError, Event, EventType, IngestEvent, IngestedEventRef, Result, Session,
    SessionStatus, Severity, MAX_BATCH_SIZE,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use ulid::Ulid;

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    embeddings: Arc<EmbeddingQueue>,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, embeddings: Arc<EmbeddingQueue>) -> Self {
        Self { store, bus, embeddings }
    }

    /// Validates, chains, and persists a batch, then fires best-effort side
    /// effects. The whole batch either fully succeeds or returns an error;
    /// partial success is forbidden because it would corrupt per-session
    /// chains (spec §4.5 policy 4).
    pub async fn ingest(&self, tenant_id: &str, events: Vec<IngestEvent>) -> Result<Vec<IngestedEventRef>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        if events.len() > MAX_BATCH_SIZE {
            return Err(AgentLensError::validation(format!(
                "batch of {} events exceeds the maximum of {MAX_BATCH_SIZE}",
                events.len()
            )));
        }
        for e in &events {
            EventType::parse(&e.event_type)
                .ok_or_else(|| AgentLensError::validation(format!("unknown eventType: {}", e.event_type)))?;
            if let Some(s) = &e.severity {
                Severity::parse(s).ok_or_else(|| AgentLensError::validation(format!("unknown severity: {s}")))?;
            }
        }

        let mut groups: BTreeMap<String, Vec<IngestEvent>> = BTreeMap::new();
        for e in events {
            groups.entry(e.session_id.clone()).or_default().push(e);
        }

        let mut refs = Vec::new();
        let mut session_summaries_due = Vec::new();
        for (session_id, group) in groups {
            let agent_id = group[0].agent_id.clone();
            let built = self.chain_and_insert(tenant_id, &session_id, &agent_id, group).await?;
            if built.iter().any(|e| e.event_type == EventType::SessionEnded) {
                session_summaries_due.push(session_id.clone());
            }
            for event in &built {
                refs.push(IngestedEventRef { id: event.id, hash: event.hash.clone() });
            }
            self.publish_side_effects(tenant_id, &session_id, &built).await;
        }
        for session_id in session_summaries_due {
            self.embeddings.enqueue_session_summary(tenant_id, &session_id).await;
        }
        Ok(refs)
    }

    async fn chain_and_insert(
        &self,
        tenant_id: &str,
        session_id: &str,
        agent_id: &str,
        mut group: Vec<IngestEvent>,
    ) -> Result<Vec<Event>> {
        let lock = self.store.session_lock(tenant_id, session_id).await;
        let _guard = lock.lock().await;

        let mut prev_hash = self.store.last_event_hash(tenant_id, session_id).await?;
        let mut built = Vec::with_capacity(group.len());
        for ingest in group.drain(..) {
            let mut payload = ingest.payload;
            Event::truncate_payload(&mut payload);
            let event_type = EventType::parse(&ingest.event_type).expect("validated above");
            let severity = ingest
                .severity
                .as_deref()
                .map(|s| Severity::parse(s).expect("validated above"))
                .unwrap_or_default();

            let mut event = Event {
                id: Ulid::new(),
                tenant_id: tenant_id.to_string(),
                timestamp: ingest.timestamp.unwrap_or_else(chrono::Utc::now),
                session_id: session_id.to_string(),
                agent_id: agent_id.to_string(),
                event_type,
                severity,
                payload,
                metadata: ingest.metadata,
                prev_hash: prev_hash.clone(),
                hash: String::new(),
            };
            event.hash = event.compute_hash();
            prev_hash = Some(event.hash.clone());
            built.push(event);
        }

        for event in &built {
            self.store.append_event(event).await?;
        }
        self.roll_forward(tenant_id, session_id, agent_id, &built).await?;
        Ok(built)
    }

    async fn roll_forward(&self, tenant_id: &str, session_id: &str, agent_id: &str, events: &[Event]) -> Result<()> {
        let mut session = match self.store.get_session(tenant_id, session_id).await? {
            Some(s) => s,
            None => Session::new(tenant_id, session_id, agent_id, events[0].timestamp),
        };
        let is_new_session = session.aggregates.event_count == 0;

        for event in events {
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
        }
        self.store.upsert_session(&session).await?;

        let mut agent = match self.store.get_agent(tenant_id, agent_id).await? {
            Some(a) => a,
            None => Agent::new(tenant_id, agent_id, events[0].timestamp),
        };
        agent.last_seen_at = events.last().expect("non-empty group").timestamp;
        if is_new_session {
            agent.session_count += 1;
        }
        self.store.upsert_agent(&agent).await
    }

    /// Bus publish, embedding enqueue: best-effort, never blocks
    /// acknowledgement (spec §4.5 policy 5, §7 propagation policy).
    async fn publish_side_effects(&self, tenant_id: &str, session_id: &str, events: &[Event]) {
        for event in events {
            self.bus.publish(BusEvent::EventIngested { tenant_id: tenant_id.to_string(), event: event.clone() }).await;
        }
        self.bus
            .publish(BusEvent::SessionUpdated { tenant_id: tenant_id.to_string(), session_id: session_id.to_string() })
            .await;
        for event in events {
            if let Some(summary) = summarize_for_embedding(event) {
                self.embeddings.enqueue_event(tenant_id, event.id.to_string(), summary).await;
            }
        }
    }
}

/// Produces the text an event contributes to recall, or `None` when the
/// event carries nothing worth embedding (e.g. a bare `tool_call` with no
/// free text).
fn summarize_for_embedding(event: &Event) -> Option<String> {
    let text = match event.event_type {
        EventType::LlmResponse | EventType::ToolResponse | EventType::Error => event
            .payload
            .get("content")
            .or_else(|| event.payload.get("output"))
            .or_else(|| event.payload.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        _ => None,
    };
    text.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingQueue, MockEmbeddingService};
    use agentlens_store::MemoryStore;

    fn sample(session_id: &str, event_type: &str, payload: serde_json::Value) -> IngestEvent {
        serde_json::from_value(serde_json::json!({
            "session_id": session_id,
            "agent_id": "a1",
            "event_type": event_type,
            "payload": payload
        }))
        .unwrap()
    }

    fn pipeline() -> (IngestPipeline, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let bus = Arc::new(EventBus::new(256));
        let embeddings = Arc::new(EmbeddingQueue::new(Arc::new(MockEmbeddingService::new(4)), store.clone(), 1000));
        (IngestPipeline::new(store.clone(), bus, embeddings), store)
    }

    #[tokio::test]
    async fn chains_events_within_one_session() {
        let (pipeline, store) = pipeline();
        let refs = pipeline
            .ingest("t1", vec![sample("s1", "tool_call", serde_json::json!({})), sample("s1", "tool_response", serde_json::json!({}))])
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);

        let events = store.session_events("t1", "s1").await.unwrap();
        assert!(events[0].prev_hash.is_none());
        assert_eq!(events[1].prev_hash, Some(events[0].hash.clone()));

        let session = store.get_session("t1", "s1").await.unwrap().unwrap();
        assert_eq!(session.aggregates.event_count, 2);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn critical_severity_marks_session_error() {
        let (pipeline, store) = pipeline();
        pipeline.ingest("t1", vec![sample("s2", "error", serde_json::json!({}))].into_iter().map(|mut e| { e.severity = Some("critical".into()); e }).collect()).await.unwrap();
        let session = store.get_session("t1", "s2").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn rejects_unknown_event_type() {
        let (pipeline, _) = pipeline();
        let err = pipeline.ingest("t1", vec![sample("s1", "not_real", serde_json::json!({}))]).await.unwrap_err();
        assert_eq!(err.tag(), "validation");
    }

    #[tokio::test]
    async fn rejects_oversized_batch() {
        let (pipeline, _) = pipeline();
        let events = (0..MAX_BATCH_SIZE + 1).map(|_| sample("s1", "tool_call", serde_json::json!({}))).collect();
        let err = pipeline.ingest("t1", events).await.unwrap_err();
        assert_eq!(err.tag(), "validation");
    }
}
