//! Per-API-key token bucket and monthly org quota (spec §4.12). The bucket
//! follows the teacher's `RequestWindow`/`RateLimiter` shape (a windowed
//! counter behind an `RwLock<HashMap<...>>`, refilled on read rather than by
//! a background ticker), adapted from a request-count window to a
//! capacity-based bucket that refills to full every interval instead of
//! resetting a count to zero.

use agentlens_store::{EventFilter, Store};
use agentlens_types::{AgentLensError, OrgPlan, PlanTier, Result};
use chrono::{Datelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_CAPACITY: u32 = 100;
const REFILL_INTERVAL: Duration = Duration::from_secs(60);
const QUOTA_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Bucket {
    capacity: u32,
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32) -> Self {
        Self { capacity, tokens: capacity, last_refill: Instant::now() }
    }

    fn try_consume(&mut self) -> bool {
        if self.last_refill.elapsed() >= REFILL_INTERVAL {
            self.tokens = self.capacity;
            self.last_refill = Instant::now();
        }
        if self.tokens == 0 {
            false
        } else {
            self.tokens -= 1;
            true
        }
    }
}

/// Per-API-key token bucket (spec §4.12, first paragraph). One bucket per
/// key id, capacity defaulting to 100 and refilling to full every 60s.
#[derive(Debug, Default)]
pub struct KeyRateLimiter {
    buckets: RwLock<HashMap<uuid::Uuid, Bucket>>,
}

impl KeyRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token for `key_id`, creating its bucket at `capacity` (the
    /// key's configured `rateLimit`, or the default) on first use.
    pub async fn try_acquire(&self, key_id: uuid::Uuid, capacity: Option<u32>) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key_id)
            .or_insert_with(|| Bucket::new(capacity.unwrap_or(DEFAULT_CAPACITY)));
        if bucket.try_consume() {
            Ok(())
        } else {
            Err(AgentLensError::RateLimited { retry_after_secs: REFILL_INTERVAL.as_secs() })
        }
    }
}

/// Outcome of a monthly quota check (spec §4.12, second paragraph).
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaStatus {
    Ok,
    Warning { usage_pct: f64 },
    Blocked,
}

#[derive(Clone)]
struct CachedQuota {
    plan: OrgPlan,
    month_count: u64,
    cached_at: Instant,
}

/// Monthly org quota check, backed by a short-TTL cache over the plan and
/// current-month event count (spec's "persistent counter in Redis serves the
/// fast path... falling back to an authoritative SQL aggregate query on
/// miss" — no Redis dependency exists anywhere in this codebase's corpus, so
/// the fast path here is an in-process cache with the same TTL instead; the
/// authoritative query is always `EventReader::query_events` scoped to the
/// current UTC month).
pub struct QuotaChecker {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<String, CachedQuota>>,
}

impl QuotaChecker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, cache: RwLock::new(HashMap::new()) }
    }

    pub async fn check(&self, tenant_id: &str) -> Result<QuotaStatus> {
        let cached = self.cache.read().await.get(tenant_id).cloned();
        let (plan, month_count) = match cached {
            Some(c) if c.cached_at.elapsed() < QUOTA_CACHE_TTL => (c.plan, c.month_count),
            _ => {
                let plan = match self.store.get_plan(tenant_id).await? {
                    Some(p) => p,
                    None => return Ok(QuotaStatus::Ok),
                };
                let month_count = self.current_month_event_count(tenant_id).await?;
                self.cache.write().await.insert(
                    tenant_id.to_string(),
                    CachedQuota { plan: plan.clone(), month_count, cached_at: Instant::now() },
                );
                (plan, month_count)
            }
        };

        if plan.event_quota == 0 {
            return Ok(QuotaStatus::Ok);
        }
        let usage_pct = month_count as f64 / plan.event_quota as f64;
        if usage_pct < 0.8 {
            return Ok(QuotaStatus::Ok);
        }
        if usage_pct < 1.0 {
            return Ok(QuotaStatus::Warning { usage_pct });
        }
        match plan.tier {
            PlanTier::Free => Ok(QuotaStatus::Blocked),
            PlanTier::Paid => {
                let cap = plan.event_quota as f64 * plan.overage_cap_multiplier;
                if (month_count as f64) < cap {
                    Ok(QuotaStatus::Warning { usage_pct })
                } else {
                    Ok(QuotaStatus::Blocked)
                }
            }
        }
    }

    async fn current_month_event_count(&self, tenant_id: &str) -> Result<u64> {
        let now = Utc::now();
        let month_start = now
            .date_naive()
            .with_day(1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
            .and_utc();
        let filter = EventFilter { since: Some(month_start), limit: u32::MAX, ..Default::default() };
        Ok(self.store.query_events(tenant_id, &filter).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_store::MemoryStore;
    use agentlens_types::{Event, EventType, Severity};
    use ulid::Ulid;

    fn event(tenant: &str) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: tenant.into(),
            timestamp: Utc::now(),
            session_id: "s1".into(),
            agent_id: "a1".into(),
            event_type: EventType::ToolCall,
            severity: Severity::Info,
            payload: serde_json::json!({}),
            metadata: None,
            prev_hash: None,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    #[tokio::test]
    async fn bucket_rejects_once_drained() {
        let limiter = KeyRateLimiter::new();
        let key = uuid::Uuid::new_v4();
        for _ in 0..3 {
            limiter.try_acquire(key, Some(3)).await.unwrap();
        }
        assert!(limiter.try_acquire(key, Some(3)).await.is_err());
    }

    #[tokio::test]
    async fn quota_blocks_free_plan_at_limit() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.save_plan(&OrgPlan::free("t1", 2)).await.unwrap();
        for _ in 0..2 {
            store.append_event(&event("t1")).await.unwrap();
        }
        let checker = QuotaChecker::new(store);
        assert_eq!(checker.check("t1").await.unwrap(), QuotaStatus::Blocked);
    }

    #[tokio::test]
    async fn quota_warns_under_100_percent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.save_plan(&OrgPlan::free("t1", 10)).await.unwrap();
        for _ in 0..9 {
            store.append_event(&event("t1")).await.unwrap();
        }
        let checker = QuotaChecker::new(store);
        assert!(matches!(checker.check("t1").await.unwrap(), QuotaStatus::Warning { .. }));
    }

    #[tokio::test]
    async fn paid_plan_continues_within_overage_cap() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.save_plan(&OrgPlan::paid("t1", 10)).await.unwrap();
        for _ in 0..15 {
            store.append_event(&event("t1")).await.unwrap();
        }
        let checker = QuotaChecker::new(store);
        assert!(matches!(checker.check("t1").await.unwrap(), QuotaStatus::Warning { .. }));
    }

    #[tokio::test]
    async fn paid_plan_blocks_beyond_overage_cap() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.save_plan(&OrgPlan::paid("t1", 10)).await.unwrap();
        for _ in 0..21 {
            store.append_event(&event("t1")).await.unwrap();
        }
        let checker = QuotaChecker::new(store);
        assert_eq!(checker.check("t1").await.unwrap(), QuotaStatus::Blocked);
    }
}
