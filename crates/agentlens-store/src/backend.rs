//! Storage traits. The event path is split into `EventWriter`/`EventReader`
//! (spec §9: ingest only ever needs the writer half, queries only the reader
//! half, and the split keeps `IngestPipeline` from depending on query-side
//! methods it never calls). Every other entity gets its own narrow trait in
//! the teacher's one-store-per-concern style (`agent_store.rs`,
//! `api_key_store.rs`): `save`/`load`/`list`, `find_by_*` for lookups.

use agentlens_types::{
    Agent, AlertHistoryEntry, AlertRule, ApiKey, Benchmark, Embedding, Event, GuardrailRule,
    GuardrailState, Lesson, NotificationChannel, OrgPlan, Result, Session, SessionSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filters accepted by `EventReader::query_events` (spec §6 `GET /events`).
/// `event_types`/`severities` match if the event's value is in the set
/// (empty set means unfiltered); `payload_contains` matches a case-sensitive
/// substring of the serialized payload.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub event_types: Vec<String>,
    pub severities: Vec<String>,
    pub payload_contains: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Filters accepted by `EventReader::query_sessions` (spec §6 `GET /sessions`).
/// `tags` matches a session if it carries any of the given tags (empty set
/// means unfiltered).
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Write-side of the event store: appends to the per-session hash chain and
/// rolls sessions/agents forward. Implemented by whatever backend the
/// ingest pipeline (C5) and batch writer (C4) are configured with.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Acquire the lock serializing the read-tip/append sequence for one
    /// session (spec §5), so two concurrent ingests of the same session
    /// never compute the same `prevHash`. Callers must hold the returned
    /// guard across both `last_event_hash` and the matching `append_event`.
    async fn session_lock(&self, tenant_id: &str, session_id: &str) -> std::sync::Arc<tokio::sync::Mutex<()>>;

    /// The hash of the most recently appended event for this session, if
    /// any (the chain's current tip, consulted before computing the next
    /// event's `prevHash`).
    async fn last_event_hash(&self, tenant_id: &str, session_id: &str) -> Result<Option<String>>;

    /// Append one already-hashed event. Callers are responsible for having
    /// set `prev_hash` to the value `last_event_hash` returned moments
    /// earlier; the backend does not re-derive it.
    async fn append_event(&self, event: &Event) -> Result<()>;

    async fn upsert_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<Option<Session>>;
    async fn upsert_agent(&self, agent: &Agent) -> Result<()>;
    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>>;
}

/// Read-side of the event store: the query and export paths (C1 `GET
/// /events`, `GET /sessions`, C14 export, C15 diagnostics).
#[async_trait]
pub trait EventReader: Send + Sync {
    async fn query_events(&self, tenant_id: &str, filter: &EventFilter) -> Result<Vec<Event>>;
    async fn query_sessions(
        &self,
        tenant_id: &str,
        filter: &SessionFilter,
    ) -> Result<Vec<Session>>;
    async fn session_events(&self, tenant_id: &str, session_id: &str) -> Result<Vec<Event>>;
    async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn create(&self, key: &ApiKey) -> Result<()>;
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;
    async fn revoke(&self, tenant_id: &str, id: Uuid) -> Result<()>;
    async fn list(&self, tenant_id: &str) -> Result<Vec<ApiKey>>;
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Insert a new embedding, or overwrite the source fields of the
    /// existing row sharing `(tenant_id, content_hash)` in place (P5).
    async fn upsert(&self, embedding: &Embedding) -> Result<()>;
    async fn find_by_content_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
    ) -> Result<Option<Embedding>>;
    /// All embeddings for a tenant, for in-process cosine-similarity recall
    /// (C8). Backends that can push the search down to SQL are still free
    /// to do so; this fallback keeps the recall engine backend-agnostic.
    async fn all(&self, tenant_id: &str) -> Result<Vec<Embedding>>;
}

#[async_trait]
pub trait LessonStore: Send + Sync {
    async fn save(&self, lesson: &Lesson) -> Result<()>;
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Lesson>>;
    async fn list(&self, tenant_id: &str, include_archived: bool) -> Result<Vec<Lesson>>;
    async fn record_access(&self, tenant_id: &str, id: Uuid) -> Result<()>;
    async fn archive(&self, tenant_id: &str, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait SessionSummaryStore: Send + Sync {
    async fn upsert(&self, summary: &SessionSummary) -> Result<()>;
    async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Option<SessionSummary>>;
}

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn save(&self, rule: &AlertRule) -> Result<()>;
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<AlertRule>>;
    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<AlertRule>>;
    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()>;
    async fn append_history(&self, entry: &AlertHistoryEntry) -> Result<()>;
    async fn last_triggered_at(
        &self,
        tenant_id: &str,
        rule_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>>;
    async fn history(&self, tenant_id: &str, rule_id: Uuid, limit: u32) -> Result<Vec<AlertHistoryEntry>>;
}

#[async_trait]
pub trait GuardrailRuleStore: Send + Sync {
    async fn save(&self, rule: &GuardrailRule) -> Result<()>;
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<GuardrailRule>>;
    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<GuardrailRule>>;
    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()>;
    async fn get_state(&self, tenant_id: &str, rule_id: Uuid) -> Result<GuardrailState>;
    async fn save_state(&self, tenant_id: &str, rule_id: Uuid, state: &GuardrailState) -> Result<()>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn save(&self, channel: &NotificationChannel) -> Result<()>;
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<NotificationChannel>>;
    async fn list(&self, tenant_id: &str) -> Result<Vec<NotificationChannel>>;
    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait BenchmarkStore: Send + Sync {
    async fn save(&self, benchmark: &Benchmark) -> Result<()>;
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Benchmark>>;
    async fn list(&self, tenant_id: &str) -> Result<Vec<Benchmark>>;
}

/// Summaries are capped at this length before being stored (spec §4.10).
pub const SUMMARY_MAX_LEN: usize = 500;

/// One append-only row per dispatched notification (spec §4.10), payload
/// summaries capped at 500 chars.
#[derive(Debug, Clone)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub channel_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub rule_type: String,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    pub summary: String,
}

#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    async fn append(&self, entry: &NotificationLogEntry) -> Result<()>;
    async fn recent(&self, tenant_id: &str, limit: u32) -> Result<Vec<NotificationLogEntry>>;
}

/// Org billing plan lookup for the monthly quota check (spec §4.12). The
/// authoritative event count itself comes from `EventReader::query_events`
/// over the current UTC month, not from this trait.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get_plan(&self, tenant_id: &str) -> Result<Option<OrgPlan>>;
    async fn save_plan(&self, plan: &OrgPlan) -> Result<()>;
}

/// The aggregate store handle every other crate is wired against. A single
/// object-safe supertrait keeps `AppState`/`IngestPipeline`/the rule
/// engines from juggling nine separate `Arc<dyn ...>` fields.
pub trait Store:
    EventWriter
    + EventReader
    + ApiKeyStore
    + EmbeddingStore
    + LessonStore
    + SessionSummaryStore
    + AlertRuleStore
    + GuardrailRuleStore
    + ChannelStore
    + BenchmarkStore
    + NotificationLogStore
    + PlanStore
    + std::fmt::Debug
{
}

impl<T> Store for T where
    T: EventWriter
        + EventReader
        + ApiKeyStore
        + EmbeddingStore
        + LessonStore
        + SessionSummaryStore
        + AlertRuleStore
        + GuardrailRuleStore
        + ChannelStore
        + BenchmarkStore
        + NotificationLogStore
        + PlanStore
        + std::fmt::Debug
{
}
