//! In-memory store (spec §5: "single-process deployments may use an
//! in-memory backend for development and tests"). Mirrors the teacher's
//! `MemoryBackend`: a `tokio::sync::RwLock` around a plain map per entity,
//! with one extra per-session `Mutex` pool (`session_locks`) serializing
//! the read-then-append hash-chain step so two events for the same session
//! never race on `prev_hash` (spec §5).

use crate::backend::{
    AlertRuleStore, ApiKeyStore, BenchmarkStore, ChannelStore, EmbeddingStore, EventFilter,
    EventReader, EventWriter, GuardrailRuleStore, LessonStore, NotificationLogEntry,
    NotificationLogStore, PlanStore, SessionFilter, SessionSummaryStore,
};
use agentlens_types::{
    Agent, AgentLensError, AlertHistoryEntry, AlertRule, ApiKey, Benchmark, Embedding, Event,
    GuardrailRule, GuardrailState, Lesson, NotificationChannel, OrgPlan, Result, Session,
    SessionSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

fn tkey(tenant_id: &str, id: impl std::fmt::Display) -> String {
    format!("{tenant_id}:{id}")
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Vec<Event>>>, // tenant:session -> ordered events
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sessions: RwLock<HashMap<String, Session>>,
    agents: RwLock<HashMap<String, Agent>>,
    api_keys: RwLock<HashMap<String, ApiKey>>, // key_hash -> key
    embeddings: RwLock<HashMap<String, Embedding>>, // tenant:content_hash -> embedding
    lessons: RwLock<HashMap<String, Lesson>>,
    summaries: RwLock<HashMap<String, SessionSummary>>,
    alert_rules: RwLock<HashMap<String, AlertRule>>,
    alert_history: RwLock<HashMap<String, Vec<AlertHistoryEntry>>>,
    guardrail_rules: RwLock<HashMap<String, GuardrailRule>>,
    guardrail_state: RwLock<HashMap<String, GuardrailState>>,
    channels: RwLock<HashMap<String, NotificationChannel>>,
    benchmarks: RwLock<HashMap<String, Benchmark>>,
    notification_log: RwLock<HashMap<String, Vec<NotificationLogEntry>>>,
    plans: RwLock<HashMap<String, OrgPlan>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventWriter for MemoryStore {
    async fn session_lock(&self, tenant_id: &str, session_id: &str) -> Arc<Mutex<()>> {
        let key = tkey(tenant_id, session_id);
        let mut locks = self.session_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn last_event_hash(&self, tenant_id: &str, session_id: &str) -> Result<Option<String>> {
        let events = self.events.read().await;
        Ok(events
            .get(&tkey(tenant_id, session_id))
            .and_then(|v| v.last())
            .map(|e| e.hash.clone()))
    }

    async fn append_event(&self, event: &Event) -> Result<()> {
        let mut events = self.events.write().await;
        events
            .entry(tkey(&event.tenant_id, &event.session_id))
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn upsert_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(tkey(&session.tenant_id, &session.session_id), session.clone());
        Ok(())
    }

    async fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&tkey(tenant_id, session_id)).cloned())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.agents
            .write()
            .await
            .insert(tkey(&agent.tenant_id, &agent.agent_id), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(&tkey(tenant_id, agent_id)).cloned())
    }
}

#[async_trait]
impl EventReader for MemoryStore {
    async fn query_events(&self, tenant_id: &str, filter: &EventFilter) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{tenant_id}:")))
            .flat_map(|(_, v)| v.iter().cloned())
            .filter(|e| filter.session_id.as_deref().is_none_or(|s| s == e.session_id))
            .filter(|e| filter.agent_id.as_deref().is_none_or(|a| a == e.agent_id))
            .filter(|e| filter.event_types.is_empty() || filter.event_types.iter().any(|t| t == e.event_type.as_str()))
            .filter(|e| filter.severities.is_empty() || filter.severities.iter().any(|s| s == e.severity.as_str()))
            .filter(|e| {
                filter
                    .payload_contains
                    .as_deref()
                    .is_none_or(|needle| e.payload.to_string().contains(needle))
            })
            .filter(|e| filter.since.is_none_or(|s| e.timestamp >= s))
            .filter(|e| filter.until.is_none_or(|u| e.timestamp <= u))
            .collect();
        matched.sort_by_key(|e| e.timestamp);
        let offset = filter.offset as usize;
        let limit = if filter.limit == 0 { matched.len() } else { filter.limit as usize };
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn query_sessions(&self, tenant_id: &str, filter: &SessionFilter) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut matched: Vec<Session> = sessions
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{tenant_id}:")))
            .map(|(_, v)| v.clone())
            .filter(|s| filter.agent_id.as_deref().is_none_or(|a| a == s.agent_id))
            .filter(|s| {
                filter
                    .status
                    .as_deref()
                    .is_none_or(|st| st == s.status.as_str())
            })
            .filter(|s| filter.tags.is_empty() || filter.tags.iter().any(|t| s.tags.contains(t)))
            .filter(|s| filter.since.is_none_or(|since| s.started_at >= since))
            .filter(|s| filter.until.is_none_or(|until| s.started_at <= until))
            .collect();
        matched.sort_by_key(|s| s.started_at);
        let offset = filter.offset as usize;
        let limit = if filter.limit == 0 { matched.len() } else { filter.limit as usize };
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn session_events(&self, tenant_id: &str, session_id: &str) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .await
            .get(&tkey(tenant_id, session_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{tenant_id}:")))
            .map(|(_, v)| v.clone())
            .collect())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn create(&self, key: &ApiKey) -> Result<()> {
        self.api_keys.write().await.insert(key.key_hash.clone(), key.clone());
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        Ok(self.api_keys.read().await.get(key_hash).cloned())
    }

    async fn revoke(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        let mut keys = self.api_keys.write().await;
        if let Some(k) = keys.values_mut().find(|k| k.tenant_id == tenant_id && k.id == id) {
            k.revoked_at = Some(Utc::now());
            Ok(())
        } else {
            Err(AgentLensError::NotFound(format!("api key {id}")))
        }
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<ApiKey>> {
        Ok(self
            .api_keys
            .read()
            .await
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn upsert(&self, embedding: &Embedding) -> Result<()> {
        let key = tkey(&embedding.tenant_id, &embedding.content_hash);
        let mut embeddings = self.embeddings.write().await;
        match embeddings.get_mut(&key) {
            Some(existing) => {
                existing.source_type = embedding.source_type;
                existing.source_id = embedding.source_id.clone();
            }
            None => {
                embeddings.insert(key, embedding.clone());
            }
        }
        Ok(())
    }

    async fn find_by_content_hash(&self, tenant_id: &str, content_hash: &str) -> Result<Option<Embedding>> {
        Ok(self.embeddings.read().await.get(&tkey(tenant_id, content_hash)).cloned())
    }

    async fn all(&self, tenant_id: &str) -> Result<Vec<Embedding>> {
        Ok(self
            .embeddings
            .read()
            .await
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LessonStore for MemoryStore {
    async fn save(&self, lesson: &Lesson) -> Result<()> {
        self.lessons
            .write()
            .await
            .insert(tkey(&lesson.tenant_id, lesson.id), lesson.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Lesson>> {
        Ok(self.lessons.read().await.get(&tkey(tenant_id, id)).cloned())
    }

    async fn list(&self, tenant_id: &str, include_archived: bool) -> Result<Vec<Lesson>> {
        Ok(self
            .lessons
            .read()
            .await
            .values()
            .filter(|l| l.tenant_id == tenant_id && (include_archived || !l.archived))
            .cloned()
            .collect())
    }

    async fn record_access(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        let mut lessons = self.lessons.write().await;
        if let Some(l) = lessons.get_mut(&tkey(tenant_id, id)) {
            l.access_count += 1;
        }
        Ok(())
    }

    async fn archive(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        let mut lessons = self.lessons.write().await;
        if let Some(l) = lessons.get_mut(&tkey(tenant_id, id)) {
            l.archived = true;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionSummaryStore for MemoryStore {
    async fn upsert(&self, summary: &SessionSummary) -> Result<()> {
        self.summaries
            .write()
            .await
            .insert(tkey(&summary.tenant_id, &summary.session_id), summary.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Option<SessionSummary>> {
        Ok(self.summaries.read().await.get(&tkey(tenant_id, session_id)).cloned())
    }
}

#[async_trait]
impl AlertRuleStore for MemoryStore {
    async fn save(&self, rule: &AlertRule) -> Result<()> {
        self.alert_rules
            .write()
            .await
            .insert(tkey(&rule.tenant_id, rule.id), rule.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<AlertRule>> {
        Ok(self.alert_rules.read().await.get(&tkey(tenant_id, id)).cloned())
    }

    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<AlertRule>> {
        Ok(self
            .alert_rules
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.enabled)
            .cloned()
            .collect())
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        self.alert_rules.write().await.remove(&tkey(tenant_id, id));
        Ok(())
    }

    async fn append_history(&self, entry: &AlertHistoryEntry) -> Result<()> {
        self.alert_history
            .write()
            .await
            .entry(tkey(&entry.tenant_id, entry.rule_id))
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn last_triggered_at(&self, tenant_id: &str, rule_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .alert_history
            .read()
            .await
            .get(&tkey(tenant_id, rule_id))
            .and_then(|h| h.last())
            .map(|e| e.triggered_at))
    }

    async fn history(&self, tenant_id: &str, rule_id: Uuid, limit: u32) -> Result<Vec<AlertHistoryEntry>> {
        let history = self.alert_history.read().await;
        let mut entries = history.get(&tkey(tenant_id, rule_id)).cloned().unwrap_or_default();
        entries.sort_by_key(|e| std::cmp::Reverse(e.triggered_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[async_trait]
impl GuardrailRuleStore for MemoryStore {
    async fn save(&self, rule: &GuardrailRule) -> Result<()> {
        self.guardrail_rules
            .write()
            .await
            .insert(tkey(&rule.tenant_id, rule.id), rule.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<GuardrailRule>> {
        Ok(self.guardrail_rules.read().await.get(&tkey(tenant_id, id)).cloned())
    }

    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<GuardrailRule>> {
        Ok(self
            .guardrail_rules
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.enabled)
            .cloned()
            .collect())
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        self.guardrail_rules.write().await.remove(&tkey(tenant_id, id));
        self.guardrail_state.write().await.remove(&tkey(tenant_id, id));
        Ok(())
    }

    async fn get_state(&self, tenant_id: &str, rule_id: Uuid) -> Result<GuardrailState> {
        Ok(self
            .guardrail_state
            .read()
            .await
            .get(&tkey(tenant_id, rule_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_state(&self, tenant_id: &str, rule_id: Uuid, state: &GuardrailState) -> Result<()> {
        self.guardrail_state
            .write()
            .await
            .insert(tkey(tenant_id, rule_id), state.clone());
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn save(&self, channel: &NotificationChannel) -> Result<()> {
        self.channels
            .write()
            .await
            .insert(tkey(&channel.tenant_id, channel.id), channel.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self.channels.read().await.get(&tkey(tenant_id, id)).cloned())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<NotificationChannel>> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        self.channels.write().await.remove(&tkey(tenant_id, id));
        Ok(())
    }
}

#[async_trait]
impl BenchmarkStore for MemoryStore {
    async fn save(&self, benchmark: &Benchmark) -> Result<()> {
        self.benchmarks
            .write()
            .await
            .insert(tkey(&benchmark.tenant_id, benchmark.id), benchmark.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Benchmark>> {
        Ok(self.benchmarks.read().await.get(&tkey(tenant_id, id)).cloned())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<Benchmark>> {
        Ok(self
            .benchmarks
            .read()
            .await
            .values()
            .filter(|b| b.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationLogStore for MemoryStore {
    async fn append(&self, entry: &NotificationLogEntry) -> Result<()> {
        self.notification_log
            .write()
            .await
            .entry(entry.tenant_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn recent(&self, tenant_id: &str, limit: u32) -> Result<Vec<NotificationLogEntry>> {
        let log = self.notification_log.read().await;
        let mut entries = log.get(tenant_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| std::cmp::Reverse(e.sent_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn get_plan(&self, tenant_id: &str) -> Result<Option<OrgPlan>> {
        Ok(self.plans.read().await.get(tenant_id).cloned())
    }

    async fn save_plan(&self, plan: &OrgPlan) -> Result<()> {
        self.plans.write().await.insert(plan.tenant_id.clone(), plan.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_types::{EventType, Severity};
    use ulid::Ulid;

    fn sample_event(tenant: &str, session: &str, prev_hash: Option<String>) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: tenant.into(),
            timestamp: Utc::now(),
            session_id: session.into(),
            agent_id: "agent-1".into(),
            event_type: EventType::ToolCall,
            severity: Severity::Info,
            payload: serde_json::json!({"tool": "search"}),
            metadata: None,
            prev_hash,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    #[tokio::test]
    async fn append_and_query_round_trip() {
        let store = MemoryStore::new();
        let lock = store.session_lock("t1", "s1").await;
        let _guard = lock.lock().await;
        let e1 = sample_event("t1", "s1", None);
        store.append_event(&e1).await.unwrap();
        let tip = store.last_event_hash("t1", "s1").await.unwrap();
        assert_eq!(tip, Some(e1.hash.clone()));

        let e2 = sample_event("t1", "s1", tip);
        store.append_event(&e2).await.unwrap();

        let events = store.session_events("t1", "s1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].prev_hash, Some(e1.hash));
    }

    #[tokio::test]
    async fn events_are_tenant_scoped() {
        let store = MemoryStore::new();
        store.append_event(&sample_event("t1", "s1", None)).await.unwrap();
        store.append_event(&sample_event("t2", "s1", None)).await.unwrap();

        let filter = EventFilter::default();
        let t1_events = store.query_events("t1", &filter).await.unwrap();
        assert_eq!(t1_events.len(), 1);
        assert_eq!(t1_events[0].tenant_id, "t1");
    }

    #[tokio::test]
    async fn embedding_upsert_overwrites_source_not_vector() {
        let store = MemoryStore::new();
        let mut emb = Embedding {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            source_type: agentlens_types::SourceType::Event,
            source_id: "ev-1".into(),
            content_hash: "abc".into(),
            text_content: "hello".into(),
            vector: vec![1.0, 0.0],
            model: "mock".into(),
            dimensions: 2,
            created_at: Utc::now(),
        };
        store.upsert(&emb).await.unwrap();

        emb.source_type = agentlens_types::SourceType::Session;
        emb.source_id = "sess-1".into();
        emb.vector = vec![0.0, 1.0]; // should be ignored on overwrite
        store.upsert(&emb).await.unwrap();

        let found = store.find_by_content_hash("t1", "abc").await.unwrap().unwrap();
        assert_eq!(found.source_id, "sess-1");
        assert_eq!(found.vector, vec![1.0, 0.0]);
    }
}
