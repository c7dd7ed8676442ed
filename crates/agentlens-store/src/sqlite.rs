//! SQLite-backed store. Connection setup (pragmas, pool sizing, migration
//! running) follows the teacher's `SqliteBackend`; the query layer is new —
//! the teacher's generic `kv_store` blob table doesn't fit a relational
//! domain with composite keys and per-tenant indexes (spec §6), so every
//! entity gets its own table and hand-written queries instead.

use crate::backend::{
    AlertRuleStore, ApiKeyStore, BenchmarkStore, ChannelStore, EmbeddingStore, EventFilter,
    EventReader, EventWriter, GuardrailRuleStore, LessonStore, NotificationLogEntry,
    NotificationLogStore, PlanStore, SessionFilter, SessionSummaryStore,
};
use agentlens_types::{
    Agent, AgentLensError, AlertCondition, AlertHistoryEntry, AlertRule, ApiKey, Benchmark,
    BenchmarkStatus, BenchmarkVariant, ChannelType, Embedding, Event, EventType, GuardrailRule,
    GuardrailState, Importance, Lesson, Metric, NotificationChannel, OrgPlan, PlanTier, Result,
    RuleScope, Session, SessionOutcome, SessionStatus, SessionSummary, Severity, SourceType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

fn storage_err(e: sqlx::Error) -> AgentLensError {
    AgentLensError::Storage(e.to_string())
}

fn is_busy(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("database is locked") || db.message().contains("busy"))
}

/// `?, ?, ...` for an `IN (...)` clause with `n` bound values.
fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

/// Escapes `%`/`_`/`\` so a user-supplied substring behaves literally inside
/// a `LIKE ... ESCAPE '\'`-free pattern (SQLite's default escape is none, so
/// we prefix the wildcard characters themselves rather than rely on one).
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn bytes_to_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// SQLite connection configuration, mirroring the teacher's `SqliteConfig`
/// minus the SQLCipher path (not grounded anywhere in this domain; dropped
/// per `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub url: String,
    pub max_connections: u32,
    pub wal_mode: bool,
    pub foreign_keys: bool,
    pub busy_timeout_secs: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:agentlens.db?mode=rwc".to_string(),
            max_connections: 5,
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_secs: 30,
        }
    }
}

impl SqliteConfig {
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            foreign_keys: true,
            busy_timeout_secs: 5,
        }
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SqliteStore {
    pub async fn new(url: &str) -> Result<Self> {
        Self::new_with_config(SqliteConfig { url: url.to_string(), ..Default::default() }).await
    }

    pub async fn new_with_config(config: SqliteConfig) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| AgentLensError::Storage(e.to_string()))?
            .create_if_missing(true);

        if config.foreign_keys {
            options = options.pragma("foreign_keys", "ON");
        }
        options = options.pragma("busy_timeout", config.busy_timeout_secs.to_string());
        if config.wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        sqlx::raw_sql(include_str!("../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .map_err(storage_err)?;

        info!(url = %config.url, wal = config.wal_mode, "connected to sqlite store");

        Ok(Self { pool, session_locks: Mutex::new(HashMap::new()) })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
        let id: String = row.try_get("id").map_err(storage_err)?;
        let event_type: String = row.try_get("event_type").map_err(storage_err)?;
        let severity: String = row.try_get("severity").map_err(storage_err)?;
        let payload: String = row.try_get("payload").map_err(storage_err)?;
        let metadata: Option<String> = row.try_get("metadata").map_err(storage_err)?;
        Ok(Event {
            id: id.parse().map_err(|_| AgentLensError::Corruption(format!("bad ulid {id}")))?,
            tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
            timestamp: row.try_get("timestamp").map_err(storage_err)?,
            session_id: row.try_get("session_id").map_err(storage_err)?,
            agent_id: row.try_get("agent_id").map_err(storage_err)?,
            event_type: EventType::parse(&event_type)
                .ok_or_else(|| AgentLensError::Corruption(format!("bad event_type {event_type}")))?,
            severity: Severity::parse(&severity)
                .ok_or_else(|| AgentLensError::Corruption(format!("bad severity {severity}")))?,
            payload: serde_json::from_str(&payload).map_err(|e| AgentLensError::Corruption(e.to_string()))?,
            metadata: metadata
                .map(|m| serde_json::from_str(&m))
                .transpose()
                .map_err(|e| AgentLensError::Corruption(e.to_string()))?,
            prev_hash: row.try_get("prev_hash").map_err(storage_err)?,
            hash: row.try_get("hash").map_err(storage_err)?,
        })
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
        let status: String = row.try_get("status").map_err(storage_err)?;
        let tags: String = row.try_get("tags").map_err(storage_err)?;
        Ok(Session {
            tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
            session_id: row.try_get("session_id").map_err(storage_err)?,
            agent_id: row.try_get("agent_id").map_err(storage_err)?,
            agent_name: row.try_get("agent_name").map_err(storage_err)?,
            started_at: row.try_get("started_at").map_err(storage_err)?,
            ended_at: row.try_get("ended_at").map_err(storage_err)?,
            status: SessionStatus::parse(&status)
                .ok_or_else(|| AgentLensError::Corruption(format!("bad status {status}")))?,
            aggregates: agentlens_types::SessionAggregates {
                event_count: row.try_get::<i64, _>("event_count").map_err(storage_err)? as u64,
                tool_call_count: row.try_get::<i64, _>("tool_call_count").map_err(storage_err)? as u64,
                error_count: row.try_get::<i64, _>("error_count").map_err(storage_err)? as u64,
                llm_call_count: row.try_get::<i64, _>("llm_call_count").map_err(storage_err)? as u64,
                total_input_tokens: row.try_get::<i64, _>("total_input_tokens").map_err(storage_err)? as u64,
                total_output_tokens: row.try_get::<i64, _>("total_output_tokens").map_err(storage_err)? as u64,
                total_cost_usd: row.try_get("total_cost_usd").map_err(storage_err)?,
            },
            tags: serde_json::from_str(&tags).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl EventWriter for SqliteStore {
    async fn session_lock(&self, tenant_id: &str, session_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{tenant_id}:{session_id}");
        let mut locks = self.session_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn last_event_hash(&self, tenant_id: &str, session_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT hash FROM events WHERE tenant_id = ? AND session_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<String, _>("hash")))
    }

    async fn append_event(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(&event.payload).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AgentLensError::Storage(e.to_string()))?;

        // `BEGIN IMMEDIATE` grabs the write lock up front instead of on first
        // write, so two connections racing to append to the same session
        // fail fast with SQLITE_BUSY rather than deadlocking mid-transaction
        // (spec §5). The in-process session lock (`session_lock`) is expected
        // to make that race rare; this is the belt-and-suspenders layer for
        // multi-process deployments sharing one database file.
        let mut attempt = 0u32;
        loop {
            let mut conn = self.pool.acquire().await.map_err(storage_err)?;
            let mut tx = sqlx::Connection::begin_with(&mut *conn, "BEGIN IMMEDIATE")
                .await
                .map_err(storage_err)?;
            let result = sqlx::query(
                "INSERT INTO events (id, tenant_id, session_id, agent_id, event_type, severity, timestamp, payload, metadata, prev_hash, hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.id.to_string())
            .bind(&event.tenant_id)
            .bind(&event.session_id)
            .bind(&event.agent_id)
            .bind(event.event_type.as_str())
            .bind(event.severity.as_str())
            .bind(event.timestamp)
            .bind(&payload)
            .bind(&metadata)
            .bind(&event.prev_hash)
            .bind(&event.hash)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => return tx.commit().await.map_err(storage_err),
                Err(e) if is_busy(&e) && attempt < 3 => {
                    attempt += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(20 * attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(storage_err(e)),
            }
        }
    }

    async fn upsert_session(&self, session: &Session) -> Result<()> {
        let tags = serde_json::to_string(&session.tags).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        let a = &session.aggregates;
        sqlx::query(
            "INSERT INTO sessions (tenant_id, session_id, agent_id, agent_name, started_at, ended_at, status,
                event_count, tool_call_count, error_count, llm_call_count, total_input_tokens, total_output_tokens, total_cost_usd, tags)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, session_id) DO UPDATE SET
                agent_name = excluded.agent_name, ended_at = excluded.ended_at, status = excluded.status,
                event_count = excluded.event_count, tool_call_count = excluded.tool_call_count,
                error_count = excluded.error_count, llm_call_count = excluded.llm_call_count,
                total_input_tokens = excluded.total_input_tokens, total_output_tokens = excluded.total_output_tokens,
                total_cost_usd = excluded.total_cost_usd, tags = excluded.tags",
        )
        .bind(&session.tenant_id)
        .bind(&session.session_id)
        .bind(&session.agent_id)
        .bind(&session.agent_name)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.status.as_str())
        .bind(a.event_count as i64)
        .bind(a.tool_call_count as i64)
        .bind(a.error_count as i64)
        .bind(a.llm_call_count as i64)
        .bind(a.total_input_tokens as i64)
        .bind(a.total_output_tokens as i64)
        .bind(a.total_cost_usd)
        .bind(tags)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_session(&self, tenant_id: &str, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE tenant_id = ? AND session_id = ?")
            .bind(tenant_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents (tenant_id, agent_id, name, first_seen_at, last_seen_at, session_count, paused, model_override)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, agent_id) DO UPDATE SET
                name = excluded.name, last_seen_at = excluded.last_seen_at,
                session_count = excluded.session_count, paused = excluded.paused,
                model_override = excluded.model_override",
        )
        .bind(&agent.tenant_id)
        .bind(&agent.agent_id)
        .bind(&agent.name)
        .bind(agent.first_seen_at)
        .bind(agent.last_seen_at)
        .bind(agent.session_count as i64)
        .bind(agent.paused)
        .bind(&agent.model_override)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE tenant_id = ? AND agent_id = ?")
            .bind(tenant_id)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(match row {
            Some(r) => Some(Agent {
                tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                agent_id: r.try_get("agent_id").map_err(storage_err)?,
                name: r.try_get("name").map_err(storage_err)?,
                first_seen_at: r.try_get("first_seen_at").map_err(storage_err)?,
                last_seen_at: r.try_get("last_seen_at").map_err(storage_err)?,
                session_count: r.try_get::<i64, _>("session_count").map_err(storage_err)? as u64,
                paused: r.try_get("paused").map_err(storage_err)?,
                model_override: r.try_get("model_override").map_err(storage_err)?,
            }),
            None => None,
        })
    }
}

#[async_trait]
impl EventReader for SqliteStore {
    async fn query_events(&self, tenant_id: &str, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut sql = String::from("SELECT * FROM events WHERE tenant_id = ?");
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if filter.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if !filter.event_types.is_empty() {
            sql.push_str(&format!(" AND event_type IN ({})", placeholders(filter.event_types.len())));
        }
        if !filter.severities.is_empty() {
            sql.push_str(&format!(" AND severity IN ({})", placeholders(filter.severities.len())));
        }
        if filter.payload_contains.is_some() {
            sql.push_str(" AND payload LIKE ? ESCAPE '\\'");
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql).bind(tenant_id);
        if let Some(s) = &filter.session_id {
            q = q.bind(s);
        }
        if let Some(a) = &filter.agent_id {
            q = q.bind(a);
        }
        for t in &filter.event_types {
            q = q.bind(t);
        }
        for s in &filter.severities {
            q = q.bind(s);
        }
        if let Some(needle) = &filter.payload_contains {
            q = q.bind(format!("%{}%", escape_like(needle)));
        }
        if let Some(s) = filter.since {
            q = q.bind(s);
        }
        if let Some(u) = filter.until {
            q = q.bind(u);
        }
        let limit = if filter.limit == 0 { i64::MAX } else { filter.limit as i64 };
        q = q.bind(limit).bind(filter.offset as i64);

        let rows = q.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn query_sessions(&self, tenant_id: &str, filter: &SessionFilter) -> Result<Vec<Session>> {
        let mut sql = String::from("SELECT * FROM sessions WHERE tenant_id = ?");
        if filter.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND started_at >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND started_at <= ?");
        }
        sql.push_str(" ORDER BY started_at ASC");

        let mut q = sqlx::query(&sql).bind(tenant_id);
        if let Some(a) = &filter.agent_id {
            q = q.bind(a);
        }
        if let Some(s) = &filter.status {
            q = q.bind(s);
        }
        if let Some(s) = filter.since {
            q = q.bind(s);
        }
        if let Some(u) = filter.until {
            q = q.bind(u);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(storage_err)?;
        let mut matched: Vec<Session> = rows.iter().map(Self::row_to_session).collect::<Result<Vec<_>>>()?;
        if !filter.tags.is_empty() {
            matched.retain(|s| filter.tags.iter().any(|t| s.tags.contains(t)));
        }
        let offset = filter.offset as usize;
        let limit = if filter.limit == 0 { matched.len() } else { filter.limit as usize };
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn session_events(&self, tenant_id: &str, session_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE tenant_id = ? AND session_id = ? ORDER BY timestamp ASC")
            .bind(tenant_id)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|r| {
                Ok(Agent {
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    agent_id: r.try_get("agent_id").map_err(storage_err)?,
                    name: r.try_get("name").map_err(storage_err)?,
                    first_seen_at: r.try_get("first_seen_at").map_err(storage_err)?,
                    last_seen_at: r.try_get("last_seen_at").map_err(storage_err)?,
                    session_count: r.try_get::<i64, _>("session_count").map_err(storage_err)? as u64,
                    paused: r.try_get("paused").map_err(storage_err)?,
                    model_override: r.try_get("model_override").map_err(storage_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ApiKeyStore for SqliteStore {
    async fn create(&self, key: &ApiKey) -> Result<()> {
        let scopes = serde_json::to_string(&key.scopes).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO api_keys (id, tenant_id, key_hash, scopes, rate_limit, created_at, revoked_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.id.to_string())
        .bind(&key.tenant_id)
        .bind(&key.key_hash)
        .bind(scopes)
        .bind(key.rate_limit)
        .bind(key.created_at)
        .bind(key.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(match row {
            Some(r) => {
                let id: String = r.try_get("id").map_err(storage_err)?;
                let scopes: String = r.try_get("scopes").map_err(storage_err)?;
                Some(ApiKey {
                    id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    key_hash: r.try_get("key_hash").map_err(storage_err)?,
                    scopes: serde_json::from_str(&scopes).unwrap_or_default(),
                    rate_limit: r.try_get::<Option<i64>, _>("rate_limit").map_err(storage_err)?.map(|v| v as u32),
                    created_at: r.try_get("created_at").map_err(storage_err)?,
                    revoked_at: r.try_get("revoked_at").map_err(storage_err)?,
                })
            }
            None => None,
        })
    }

    async fn revoke(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE tenant_id = ? AND id = ?")
            .bind(Utc::now())
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(AgentLensError::NotFound(format!("api key {id}")));
        }
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|r| {
                let id: String = r.try_get("id").map_err(storage_err)?;
                let scopes: String = r.try_get("scopes").map_err(storage_err)?;
                Ok(ApiKey {
                    id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    key_hash: r.try_get("key_hash").map_err(storage_err)?,
                    scopes: serde_json::from_str(&scopes).unwrap_or_default(),
                    rate_limit: r.try_get::<Option<i64>, _>("rate_limit").map_err(storage_err)?.map(|v| v as u32),
                    created_at: r.try_get("created_at").map_err(storage_err)?,
                    revoked_at: r.try_get("revoked_at").map_err(storage_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    async fn upsert(&self, embedding: &Embedding) -> Result<()> {
        sqlx::query(
            "INSERT INTO embeddings (id, tenant_id, source_type, source_id, content_hash, text_content, vector, model, dimensions, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, content_hash) DO UPDATE SET
                source_type = excluded.source_type, source_id = excluded.source_id",
        )
        .bind(embedding.id.to_string())
        .bind(&embedding.tenant_id)
        .bind(embedding.source_type.as_str())
        .bind(&embedding.source_id)
        .bind(&embedding.content_hash)
        .bind(&embedding.text_content)
        .bind(vector_to_bytes(&embedding.vector))
        .bind(&embedding.model)
        .bind(embedding.dimensions as i64)
        .bind(embedding.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn find_by_content_hash(&self, tenant_id: &str, content_hash: &str) -> Result<Option<Embedding>> {
        let row = sqlx::query("SELECT * FROM embeddings WHERE tenant_id = ? AND content_hash = ?")
            .bind(tenant_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_embedding).transpose()
    }

    async fn all(&self, tenant_id: &str) -> Result<Vec<Embedding>> {
        let rows = sqlx::query("SELECT * FROM embeddings WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_embedding).collect()
    }
}

fn row_to_embedding(row: &sqlx::sqlite::SqliteRow) -> Result<Embedding> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let source_type: String = row.try_get("source_type").map_err(storage_err)?;
    let vector: Vec<u8> = row.try_get("vector").map_err(storage_err)?;
    Ok(Embedding {
        id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
        tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| AgentLensError::Corruption(format!("bad source_type {source_type}")))?,
        source_id: row.try_get("source_id").map_err(storage_err)?,
        content_hash: row.try_get("content_hash").map_err(storage_err)?,
        text_content: row.try_get("text_content").map_err(storage_err)?,
        vector: bytes_to_vector(&vector),
        model: row.try_get("model").map_err(storage_err)?,
        dimensions: row.try_get::<i64, _>("dimensions").map_err(storage_err)? as u32,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl LessonStore for SqliteStore {
    async fn save(&self, lesson: &Lesson) -> Result<()> {
        sqlx::query(
            "INSERT INTO lessons (id, tenant_id, agent_id, category, title, content, importance, access_count, source_session_id, source_event_id, archived, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                category = excluded.category, title = excluded.title, content = excluded.content,
                importance = excluded.importance, archived = excluded.archived",
        )
        .bind(lesson.id.to_string())
        .bind(&lesson.tenant_id)
        .bind(&lesson.agent_id)
        .bind(&lesson.category)
        .bind(&lesson.title)
        .bind(&lesson.content)
        .bind(importance_str(lesson.importance))
        .bind(lesson.access_count as i64)
        .bind(&lesson.source_session_id)
        .bind(&lesson.source_event_id)
        .bind(lesson.archived)
        .bind(lesson.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Lesson>> {
        let row = sqlx::query("SELECT * FROM lessons WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_lesson).transpose()
    }

    async fn list(&self, tenant_id: &str, include_archived: bool) -> Result<Vec<Lesson>> {
        let sql = if include_archived {
            "SELECT * FROM lessons WHERE tenant_id = ?"
        } else {
            "SELECT * FROM lessons WHERE tenant_id = ? AND archived = 0"
        };
        let rows = sqlx::query(sql).bind(tenant_id).fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.iter().map(row_to_lesson).collect()
    }

    async fn record_access(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE lessons SET access_count = access_count + 1 WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn archive(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE lessons SET archived = 1 WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

fn importance_str(importance: Importance) -> &'static str {
    match importance {
        Importance::Low => "low",
        Importance::Normal => "normal",
        Importance::High => "high",
        Importance::Critical => "critical",
    }
}

fn parse_importance(s: &str) -> Option<Importance> {
    Some(match s {
        "low" => Importance::Low,
        "normal" => Importance::Normal,
        "high" => Importance::High,
        "critical" => Importance::Critical,
        _ => return None,
    })
}

fn row_to_lesson(row: &sqlx::sqlite::SqliteRow) -> Result<Lesson> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let importance: String = row.try_get("importance").map_err(storage_err)?;
    Ok(Lesson {
        id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
        tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
        agent_id: row.try_get("agent_id").map_err(storage_err)?,
        category: row.try_get("category").map_err(storage_err)?,
        title: row.try_get("title").map_err(storage_err)?,
        content: row.try_get("content").map_err(storage_err)?,
        importance: parse_importance(&importance)
            .ok_or_else(|| AgentLensError::Corruption(format!("bad importance {importance}")))?,
        access_count: row.try_get::<i64, _>("access_count").map_err(storage_err)? as u64,
        source_session_id: row.try_get("source_session_id").map_err(storage_err)?,
        source_event_id: row.try_get("source_event_id").map_err(storage_err)?,
        archived: row.try_get("archived").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl SessionSummaryStore for SqliteStore {
    async fn upsert(&self, summary: &SessionSummary) -> Result<()> {
        let topic_tags = serde_json::to_string(&summary.topic_tags).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        let tool_sequence = serde_json::to_string(&summary.tool_sequence).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO session_summaries (tenant_id, session_id, summary, topic_tags, tool_sequence, error_summary, outcome, generated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, session_id) DO UPDATE SET
                summary = excluded.summary, topic_tags = excluded.topic_tags, tool_sequence = excluded.tool_sequence,
                error_summary = excluded.error_summary, outcome = excluded.outcome, generated_at = excluded.generated_at",
        )
        .bind(&summary.tenant_id)
        .bind(&summary.session_id)
        .bind(&summary.summary)
        .bind(topic_tags)
        .bind(tool_sequence)
        .bind(&summary.error_summary)
        .bind(outcome_str(summary.outcome))
        .bind(summary.generated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Option<SessionSummary>> {
        let row = sqlx::query("SELECT * FROM session_summaries WHERE tenant_id = ? AND session_id = ?")
            .bind(tenant_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(match row {
            Some(r) => {
                let topic_tags: String = r.try_get("topic_tags").map_err(storage_err)?;
                let tool_sequence: String = r.try_get("tool_sequence").map_err(storage_err)?;
                let outcome: String = r.try_get("outcome").map_err(storage_err)?;
                Some(SessionSummary {
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    session_id: r.try_get("session_id").map_err(storage_err)?,
                    summary: r.try_get("summary").map_err(storage_err)?,
                    topic_tags: serde_json::from_str(&topic_tags).unwrap_or_default(),
                    tool_sequence: serde_json::from_str(&tool_sequence).unwrap_or_default(),
                    error_summary: r.try_get("error_summary").map_err(storage_err)?,
                    outcome: parse_outcome(&outcome)
                        .ok_or_else(|| AgentLensError::Corruption(format!("bad outcome {outcome}")))?,
                    generated_at: r.try_get("generated_at").map_err(storage_err)?,
                })
            }
            None => None,
        })
    }
}

fn outcome_str(outcome: SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Success => "success",
        SessionOutcome::Failure => "failure",
        SessionOutcome::Partial => "partial",
        SessionOutcome::Unknown => "unknown",
    }
}

fn parse_outcome(s: &str) -> Option<SessionOutcome> {
    Some(match s {
        "success" => SessionOutcome::Success,
        "failure" => SessionOutcome::Failure,
        "partial" => SessionOutcome::Partial,
        "unknown" => SessionOutcome::Unknown,
        _ => return None,
    })
}

#[async_trait]
impl AlertRuleStore for SqliteStore {
    async fn save(&self, rule: &AlertRule) -> Result<()> {
        let condition = serde_json::to_string(&rule.condition).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        let scope = serde_json::to_string(&rule.scope).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        let channels = serde_json::to_string(&rule.notify_channels).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO alert_rules (id, tenant_id, name, enabled, condition, threshold, window_minutes, scope, notify_channels, cooldown_minutes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                name = excluded.name, enabled = excluded.enabled, condition = excluded.condition,
                threshold = excluded.threshold, window_minutes = excluded.window_minutes, scope = excluded.scope,
                notify_channels = excluded.notify_channels, cooldown_minutes = excluded.cooldown_minutes",
        )
        .bind(rule.id.to_string())
        .bind(&rule.tenant_id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(condition)
        .bind(rule.threshold)
        .bind(rule.window_minutes as i64)
        .bind(scope)
        .bind(channels)
        .bind(rule.cooldown_minutes as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<AlertRule>> {
        let row = sqlx::query("SELECT * FROM alert_rules WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_alert_rule).transpose()
    }

    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT * FROM alert_rules WHERE tenant_id = ? AND enabled = 1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_alert_rule).collect()
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM alert_rules WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn append_history(&self, entry: &AlertHistoryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_history (id, rule_id, tenant_id, triggered_at, resolved_at, current_value, threshold, message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.rule_id.to_string())
        .bind(&entry.tenant_id)
        .bind(entry.triggered_at)
        .bind(entry.resolved_at)
        .bind(entry.current_value)
        .bind(entry.threshold)
        .bind(&entry.message)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn last_triggered_at(&self, tenant_id: &str, rule_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT triggered_at FROM alert_history WHERE tenant_id = ? AND rule_id = ? ORDER BY triggered_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(rule_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(|r| r.try_get("triggered_at").map_err(storage_err)).transpose()
    }

    async fn history(&self, tenant_id: &str, rule_id: Uuid, limit: u32) -> Result<Vec<AlertHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_history WHERE tenant_id = ? AND rule_id = ? ORDER BY triggered_at DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(rule_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter()
            .map(|r| {
                let id: String = r.try_get("id").map_err(storage_err)?;
                let rule_id: String = r.try_get("rule_id").map_err(storage_err)?;
                Ok(AlertHistoryEntry {
                    id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
                    rule_id: Uuid::parse_str(&rule_id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {rule_id}")))?,
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    triggered_at: r.try_get("triggered_at").map_err(storage_err)?,
                    resolved_at: r.try_get("resolved_at").map_err(storage_err)?,
                    current_value: r.try_get("current_value").map_err(storage_err)?,
                    threshold: r.try_get("threshold").map_err(storage_err)?,
                    message: r.try_get("message").map_err(storage_err)?,
                })
            })
            .collect()
    }
}

fn row_to_alert_rule(row: &sqlx::sqlite::SqliteRow) -> Result<AlertRule> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let condition: String = row.try_get("condition").map_err(storage_err)?;
    let scope: String = row.try_get("scope").map_err(storage_err)?;
    let channels: String = row.try_get("notify_channels").map_err(storage_err)?;
    Ok(AlertRule {
        id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
        tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        enabled: row.try_get("enabled").map_err(storage_err)?,
        condition: serde_json::from_str::<AlertCondition>(&condition).map_err(|e| AgentLensError::Corruption(e.to_string()))?,
        threshold: row.try_get("threshold").map_err(storage_err)?,
        window_minutes: row.try_get::<i64, _>("window_minutes").map_err(storage_err)? as u32,
        scope: serde_json::from_str::<RuleScope>(&scope).unwrap_or_default(),
        notify_channels: serde_json::from_str(&channels).unwrap_or_default(),
        cooldown_minutes: row.try_get::<i64, _>("cooldown_minutes").map_err(storage_err)? as u32,
    })
}

#[async_trait]
impl GuardrailRuleStore for SqliteStore {
    async fn save(&self, rule: &GuardrailRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO guardrail_rules (id, tenant_id, name, enabled, condition_type, condition_config, action_type, action_config, agent_id, cooldown_minutes, dry_run)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                name = excluded.name, enabled = excluded.enabled, condition_type = excluded.condition_type,
                condition_config = excluded.condition_config, action_type = excluded.action_type,
                action_config = excluded.action_config, agent_id = excluded.agent_id,
                cooldown_minutes = excluded.cooldown_minutes, dry_run = excluded.dry_run",
        )
        .bind(rule.id.to_string())
        .bind(&rule.tenant_id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(guardrail_condition_str(rule.condition_type))
        .bind(&rule.condition_config)
        .bind(guardrail_action_str(rule.action_type))
        .bind(&rule.action_config)
        .bind(&rule.agent_id)
        .bind(rule.cooldown_minutes as i64)
        .bind(rule.dry_run)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<GuardrailRule>> {
        let row = sqlx::query("SELECT * FROM guardrail_rules WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_guardrail_rule).transpose()
    }

    async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<GuardrailRule>> {
        let rows = sqlx::query("SELECT * FROM guardrail_rules WHERE tenant_id = ? AND enabled = 1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_guardrail_rule).collect()
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM guardrail_rules WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM guardrail_state WHERE tenant_id = ? AND rule_id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_state(&self, tenant_id: &str, rule_id: Uuid) -> Result<GuardrailState> {
        let row = sqlx::query("SELECT * FROM guardrail_state WHERE tenant_id = ? AND rule_id = ?")
            .bind(tenant_id)
            .bind(rule_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(match row {
            Some(r) => GuardrailState {
                last_triggered_at: r.try_get("last_triggered_at").map_err(storage_err)?,
                trigger_count: r.try_get::<i64, _>("trigger_count").map_err(storage_err)? as u64,
                last_evaluated_at: r.try_get("last_evaluated_at").map_err(storage_err)?,
                current_value: r.try_get("current_value").map_err(storage_err)?,
            },
            None => GuardrailState::default(),
        })
    }

    async fn save_state(&self, tenant_id: &str, rule_id: Uuid, state: &GuardrailState) -> Result<()> {
        sqlx::query(
            "INSERT INTO guardrail_state (tenant_id, rule_id, last_triggered_at, trigger_count, last_evaluated_at, current_value)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, rule_id) DO UPDATE SET
                last_triggered_at = excluded.last_triggered_at, trigger_count = excluded.trigger_count,
                last_evaluated_at = excluded.last_evaluated_at, current_value = excluded.current_value",
        )
        .bind(tenant_id)
        .bind(rule_id.to_string())
        .bind(state.last_triggered_at)
        .bind(state.trigger_count as i64)
        .bind(state.last_evaluated_at)
        .bind(state.current_value)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

fn guardrail_condition_str(c: agentlens_types::GuardrailConditionType) -> &'static str {
    use agentlens_types::GuardrailConditionType::*;
    match c {
        ErrorRateThreshold => "error_rate_threshold",
        CostThreshold => "cost_threshold",
        LatencyThreshold => "latency_threshold",
    }
}

fn parse_guardrail_condition(s: &str) -> Option<agentlens_types::GuardrailConditionType> {
    use agentlens_types::GuardrailConditionType::*;
    Some(match s {
        "error_rate_threshold" => ErrorRateThreshold,
        "cost_threshold" => CostThreshold,
        "latency_threshold" => LatencyThreshold,
        _ => return None,
    })
}

fn guardrail_action_str(a: agentlens_types::GuardrailActionType) -> &'static str {
    use agentlens_types::GuardrailActionType::*;
    match a {
        PauseAgent => "pause_agent",
        DowngradeModel => "downgrade_model",
        Notify => "notify",
        Log => "log",
    }
}

fn parse_guardrail_action(s: &str) -> Option<agentlens_types::GuardrailActionType> {
    use agentlens_types::GuardrailActionType::*;
    Some(match s {
        "pause_agent" => PauseAgent,
        "downgrade_model" => DowngradeModel,
        "notify" => Notify,
        "log" => Log,
        _ => return None,
    })
}

fn row_to_guardrail_rule(row: &sqlx::sqlite::SqliteRow) -> Result<GuardrailRule> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let condition_type: String = row.try_get("condition_type").map_err(storage_err)?;
    let action_type: String = row.try_get("action_type").map_err(storage_err)?;
    Ok(GuardrailRule {
        id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
        tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        enabled: row.try_get("enabled").map_err(storage_err)?,
        condition_type: parse_guardrail_condition(&condition_type)
            .ok_or_else(|| AgentLensError::Corruption(format!("bad condition_type {condition_type}")))?,
        condition_config: row.try_get("condition_config").map_err(storage_err)?,
        action_type: parse_guardrail_action(&action_type)
            .ok_or_else(|| AgentLensError::Corruption(format!("bad action_type {action_type}")))?,
        action_config: row.try_get("action_config").map_err(storage_err)?,
        agent_id: row.try_get("agent_id").map_err(storage_err)?,
        cooldown_minutes: row.try_get::<i64, _>("cooldown_minutes").map_err(storage_err)? as u32,
        dry_run: row.try_get("dry_run").map_err(storage_err)?,
    })
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn save(&self, channel: &NotificationChannel) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_channels (id, tenant_id, name, channel_type, enabled, config)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                name = excluded.name, channel_type = excluded.channel_type, enabled = excluded.enabled, config = excluded.config",
        )
        .bind(channel.id.to_string())
        .bind(&channel.tenant_id)
        .bind(&channel.name)
        .bind(channel_type_str(channel.channel_type))
        .bind(channel.enabled)
        .bind(&channel.config)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<NotificationChannel>> {
        let row = sqlx::query("SELECT * FROM notification_channels WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_channel).transpose()
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<NotificationChannel>> {
        let rows = sqlx::query("SELECT * FROM notification_channels WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_channel).collect()
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM notification_channels WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

fn channel_type_str(t: ChannelType) -> &'static str {
    match t {
        ChannelType::Webhook => "webhook",
        ChannelType::Slack => "slack",
        ChannelType::PagerDuty => "pager_duty",
        ChannelType::Email => "email",
    }
}

fn parse_channel_type(s: &str) -> Option<ChannelType> {
    Some(match s {
        "webhook" => ChannelType::Webhook,
        "slack" => ChannelType::Slack,
        "pager_duty" => ChannelType::PagerDuty,
        "email" => ChannelType::Email,
        _ => return None,
    })
}

fn row_to_channel(row: &sqlx::sqlite::SqliteRow) -> Result<NotificationChannel> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let channel_type: String = row.try_get("channel_type").map_err(storage_err)?;
    Ok(NotificationChannel {
        id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
        tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        channel_type: parse_channel_type(&channel_type)
            .ok_or_else(|| AgentLensError::Corruption(format!("bad channel_type {channel_type}")))?,
        enabled: row.try_get("enabled").map_err(storage_err)?,
        config: row.try_get("config").map_err(storage_err)?,
    })
}

#[async_trait]
impl BenchmarkStore for SqliteStore {
    async fn save(&self, benchmark: &Benchmark) -> Result<()> {
        let metrics = serde_json::to_string(&benchmark.metrics).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        let variants = serde_json::to_string(&benchmark.variants).map_err(|e| AgentLensError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO benchmarks (id, tenant_id, name, status, metrics, min_sessions_per_variant, variants)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                name = excluded.name, status = excluded.status, metrics = excluded.metrics,
                min_sessions_per_variant = excluded.min_sessions_per_variant, variants = excluded.variants",
        )
        .bind(benchmark.id.to_string())
        .bind(&benchmark.tenant_id)
        .bind(&benchmark.name)
        .bind(benchmark_status_str(benchmark.status))
        .bind(metrics)
        .bind(benchmark.min_sessions_per_variant as i64)
        .bind(variants)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<Benchmark>> {
        let row = sqlx::query("SELECT * FROM benchmarks WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_benchmark).transpose()
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<Benchmark>> {
        let rows = sqlx::query("SELECT * FROM benchmarks WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(row_to_benchmark).collect()
    }
}

fn benchmark_status_str(s: BenchmarkStatus) -> &'static str {
    match s {
        BenchmarkStatus::Draft => "draft",
        BenchmarkStatus::Running => "running",
        BenchmarkStatus::Completed => "completed",
        BenchmarkStatus::Archived => "archived",
    }
}

fn parse_benchmark_status(s: &str) -> Option<BenchmarkStatus> {
    Some(match s {
        "draft" => BenchmarkStatus::Draft,
        "running" => BenchmarkStatus::Running,
        "completed" => BenchmarkStatus::Completed,
        "archived" => BenchmarkStatus::Archived,
        _ => return None,
    })
}

fn row_to_benchmark(row: &sqlx::sqlite::SqliteRow) -> Result<Benchmark> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    let metrics: String = row.try_get("metrics").map_err(storage_err)?;
    let variants: String = row.try_get("variants").map_err(storage_err)?;
    Ok(Benchmark {
        id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
        tenant_id: row.try_get("tenant_id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        status: parse_benchmark_status(&status)
            .ok_or_else(|| AgentLensError::Corruption(format!("bad status {status}")))?,
        metrics: serde_json::from_str::<Vec<Metric>>(&metrics).map_err(|e| AgentLensError::Corruption(e.to_string()))?,
        min_sessions_per_variant: row.try_get::<i64, _>("min_sessions_per_variant").map_err(storage_err)? as u32,
        variants: serde_json::from_str::<Vec<BenchmarkVariant>>(&variants).map_err(|e| AgentLensError::Corruption(e.to_string()))?,
    })
}

#[async_trait]
impl NotificationLogStore for SqliteStore {
    async fn append(&self, entry: &NotificationLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_log (id, tenant_id, channel_id, rule_id, rule_type, sent_at, success, summary)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.tenant_id)
        .bind(entry.channel_id.to_string())
        .bind(entry.rule_id.map(|id| id.to_string()))
        .bind(&entry.rule_type)
        .bind(entry.sent_at)
        .bind(entry.success)
        .bind(&entry.summary)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn recent(&self, tenant_id: &str, limit: u32) -> Result<Vec<NotificationLogEntry>> {
        let rows = sqlx::query("SELECT * FROM notification_log WHERE tenant_id = ? ORDER BY sent_at DESC LIMIT ?")
            .bind(tenant_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|r| {
                let id: String = r.try_get("id").map_err(storage_err)?;
                let channel_id: String = r.try_get("channel_id").map_err(storage_err)?;
                let rule_id: Option<String> = r.try_get("rule_id").map_err(storage_err)?;
                Ok(NotificationLogEntry {
                    id: Uuid::parse_str(&id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {id}")))?,
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    channel_id: Uuid::parse_str(&channel_id).map_err(|_| AgentLensError::Corruption(format!("bad uuid {channel_id}")))?,
                    rule_id: rule_id.map(|s| Uuid::parse_str(&s)).transpose().map_err(|_| AgentLensError::Corruption("bad uuid".into()))?,
                    rule_type: r.try_get("rule_type").map_err(storage_err)?,
                    sent_at: r.try_get("sent_at").map_err(storage_err)?,
                    success: r.try_get("success").map_err(storage_err)?,
                    summary: r.try_get("summary").map_err(storage_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PlanStore for SqliteStore {
    async fn get_plan(&self, tenant_id: &str) -> Result<Option<OrgPlan>> {
        let row = sqlx::query("SELECT * FROM org_plans WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref()
            .map(|r| {
                let tier: String = r.try_get("tier").map_err(storage_err)?;
                Ok(OrgPlan {
                    tenant_id: r.try_get("tenant_id").map_err(storage_err)?,
                    tier: match tier.as_str() {
                        "free" => PlanTier::Free,
                        "paid" => PlanTier::Paid,
                        other => return Err(AgentLensError::Corruption(format!("bad plan tier {other}"))),
                    },
                    event_quota: r.try_get::<i64, _>("event_quota").map_err(storage_err)? as u64,
                    overage_cap_multiplier: r.try_get("overage_cap_multiplier").map_err(storage_err)?,
                })
            })
            .transpose()
    }

    async fn save_plan(&self, plan: &OrgPlan) -> Result<()> {
        let tier = match plan.tier {
            PlanTier::Free => "free",
            PlanTier::Paid => "paid",
        };
        sqlx::query(
            "INSERT INTO org_plans (tenant_id, tier, event_quota, overage_cap_multiplier)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (tenant_id) DO UPDATE SET
                tier = excluded.tier, event_quota = excluded.event_quota,
                overage_cap_multiplier = excluded.overage_cap_multiplier",
        )
        .bind(&plan.tenant_id)
        .bind(tier)
        .bind(plan.event_quota as i64)
        .bind(plan.overage_cap_multiplier)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_types::{EventType, Severity};
    use ulid::Ulid;

    async fn memory_store() -> SqliteStore {
        SqliteStore::new_with_config(SqliteConfig::memory()).await.unwrap()
    }

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
    async fn append_and_chain_events() {
        let store = memory_store().await;
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
    async fn session_upsert_round_trips_aggregates() {
        let store = memory_store().await;
        let mut session = Session::new("t1", "s1", "agent-1", Utc::now());
        session.aggregates.event_count = 3;
        store.upsert_session(&session).await.unwrap();

        let loaded = store.get_session("t1", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.aggregates.event_count, 3);
    }

    #[tokio::test]
    async fn embedding_upsert_is_content_addressed() {
        let store = memory_store().await;
        let mut emb = Embedding {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            source_type: SourceType::Event,
            source_id: "ev-1".into(),
            content_hash: "abc".into(),
            text_content: "hello".into(),
            vector: vec![1.0, 0.0],
            model: "mock".into(),
            dimensions: 2,
            created_at: Utc::now(),
        };
        store.upsert(&emb).await.unwrap();
        emb.source_id = "sess-1".into();
        emb.source_type = SourceType::Session;
        store.upsert(&emb).await.unwrap();

        let all = store.all("t1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_id, "sess-1");
    }
}
