//! Replay / diagnostics (spec §4 C15): session timeline reconstruction with
//! hash-chain verification, and the `/api/reflect` analyses (error patterns,
//! tool sequences, cost analysis, performance trends). Grounded on the same
//! `query_events`/`session_events` read surface as `alerts.rs`, reusing its
//! payload-field access convention (`payload.get("costUsd")`, etc.).

use agentlens_store::{EventFilter, Store};
use agentlens_types::{Event, EventType, Result, Severity};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// A session's events in insert order plus whether its hash chain verifies
/// (spec §4.4's `chainValid` response-envelope flag, surfaced here rather
/// than silently repaired — spec §7: "corruption... surfaced on reads,
/// never silently hidden").
#[derive(Debug, Clone)]
pub struct SessionTimeline {
    pub events: Vec<Event>,
    pub chain_valid: bool,
}

fn verify_chain(events: &[Event]) -> bool {
    let mut prev: Option<&str> = None;
    for event in events {
        if event.prev_hash.as_deref() != prev {
            return false;
        }
        if event.hash != event.compute_hash() {
            return false;
        }
        prev = Some(&event.hash);
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionAnalysis {
    ErrorPatterns,
    ToolSequences,
    CostAnalysis,
    PerformanceTrends,
}

impl ReflectionAnalysis {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "error_patterns" => Self::ErrorPatterns,
            "tool_sequences" => Self::ToolSequences,
            "cost_analysis" => Self::CostAnalysis,
            "performance_trends" => Self::PerformanceTrends,
            _ => return None,
        })
    }
}

fn tool_name(event: &Event) -> Option<String> {
    event.payload.get("tool").and_then(|v| v.as_str()).map(str::to_string)
}

pub struct DiagnosticsEngine {
    store: Arc<dyn Store>,
}

impl DiagnosticsEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn timeline(&self, tenant_id: &str, session_id: &str) -> Result<SessionTimeline> {
        let events = self.store.session_events(tenant_id, session_id).await?;
        let chain_valid = verify_chain(&events);
        Ok(SessionTimeline { events, chain_valid })
    }

    pub async fn reflect(
        &self,
        tenant_id: &str,
        analysis: ReflectionAnalysis,
        agent_id: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<serde_json::Value> {
        let filter = EventFilter {
            agent_id: agent_id.map(str::to_string),
            since: from,
            until: to,
            limit: u32::MAX,
            ..Default::default()
        };
        let events = self.store.query_events(tenant_id, &filter).await?;
        Ok(match analysis {
            ReflectionAnalysis::ErrorPatterns => error_patterns(&events, limit),
            ReflectionAnalysis::ToolSequences => tool_sequences(&events, limit),
            ReflectionAnalysis::CostAnalysis => cost_analysis(&events, limit),
            ReflectionAnalysis::PerformanceTrends => performance_trends(&events, limit),
        })
    }
}

fn error_patterns(events: &[Event], limit: u32) -> serde_json::Value {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for event in events {
        if !event.severity.is_failure() && event.event_type != EventType::ToolError {
            continue;
        }
        let key = tool_name(event).unwrap_or_else(|| event.event_type.as_str().to_string());
        *counts.entry(key).or_insert(0) += 1;
    }
    let mut patterns: Vec<_> = counts.into_iter().collect();
    patterns.sort_by(|a, b| b.1.cmp(&a.1));
    patterns.truncate(limit as usize);
    json!({
        "analysis": "error_patterns",
        "patterns": patterns.into_iter().map(|(pattern, count)| json!({"pattern": pattern, "count": count})).collect::<Vec<_>>(),
    })
}

fn tool_sequences(events: &[Event], limit: u32) -> serde_json::Value {
    let mut by_session: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        if event.event_type == EventType::ToolCall {
            by_session.entry(&event.session_id).or_default().push(event);
        }
    }
    let mut bigrams: HashMap<(String, String), u64> = HashMap::new();
    for calls in by_session.into_values() {
        let mut calls = calls;
        calls.sort_by_key(|e| e.timestamp);
        for pair in calls.windows(2) {
            if let (Some(a), Some(b)) = (tool_name(pair[0]), tool_name(pair[1])) {
                *bigrams.entry((a, b)).or_insert(0) += 1;
            }
        }
    }
    let mut sequences: Vec<_> = bigrams.into_iter().collect();
    sequences.sort_by(|a, b| b.1.cmp(&a.1));
    sequences.truncate(limit as usize);
    json!({
        "analysis": "tool_sequences",
        "sequences": sequences.into_iter().map(|((a, b), count)| json!({"from": a, "to": b, "count": count})).collect::<Vec<_>>(),
    })
}

fn cost_analysis(events: &[Event], limit: u32) -> serde_json::Value {
    let mut by_agent: HashMap<&str, f64> = HashMap::new();
    let mut total = 0.0;
    for event in events {
        if event.event_type != EventType::CostTracked {
            continue;
        }
        if let Some(cost) = event.payload.get("costUsd").and_then(|v| v.as_f64()) {
            *by_agent.entry(&event.agent_id).or_insert(0.0) += cost;
            total += cost;
        }
    }
    let mut breakdown: Vec<_> = by_agent.into_iter().collect();
    breakdown.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    breakdown.truncate(limit as usize);
    json!({
        "analysis": "cost_analysis",
        "total_cost_usd": total,
        "by_agent": breakdown.into_iter().map(|(agent_id, cost)| json!({"agentId": agent_id, "costUsd": cost})).collect::<Vec<_>>(),
    })
}

fn performance_trends(events: &[Event], limit: u32) -> serde_json::Value {
    let mut by_day: HashMap<String, (f64, u64)> = HashMap::new();
    for event in events {
        if event.event_type != EventType::ToolResponse {
            continue;
        }
        let Some(duration) = event.payload.get("durationMs").and_then(|v| v.as_f64()) else { continue };
        let day = event.timestamp.format("%Y-%m-%d").to_string();
        let entry = by_day.entry(day).or_insert((0.0, 0));
        entry.0 += duration;
        entry.1 += 1;
    }
    let mut trend: Vec<_> = by_day
        .into_iter()
        .map(|(day, (sum, count))| (day, sum / count as f64))
        .collect();
    trend.sort_by(|a, b| a.0.cmp(&b.0));
    trend.truncate(limit as usize);
    json!({
        "analysis": "performance_trends",
        "daily_avg_duration_ms": trend.into_iter().map(|(day, avg)| json!({"date": day, "avgDurationMs": avg})).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_store::MemoryStore;
    use ulid::Ulid;

    fn event(session: &str, agent: &str, event_type: EventType, severity: Severity, payload: serde_json::Value, prev_hash: Option<String>) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: "t1".into(),
            timestamp: Utc::now(),
            session_id: session.into(),
            agent_id: agent.into(),
            event_type,
            severity,
            payload,
            metadata: None,
            prev_hash,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    #[tokio::test]
    async fn timeline_flags_broken_chain() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let e1 = event("s1", "a1", EventType::ToolCall, Severity::Info, json!({"tool": "search"}), None);
        store.append_event(&e1).await.unwrap();
        // Second event claims a prev_hash that doesn't match e1's actual hash.
        let mut e2 = event("s1", "a1", EventType::ToolResponse, Severity::Info, json!({}), Some("bogus".into()));
        e2.hash = e2.compute_hash();
        store.append_event(&e2).await.unwrap();

        let engine = DiagnosticsEngine::new(store);
        let timeline = engine.timeline("t1", "s1").await.unwrap();
        assert_eq!(timeline.events.len(), 2);
        assert!(!timeline.chain_valid);
    }

    #[tokio::test]
    async fn timeline_valid_for_correctly_chained_events() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let e1 = event("s1", "a1", EventType::ToolCall, Severity::Info, json!({"tool": "search"}), None);
        store.append_event(&e1).await.unwrap();
        let e2 = event("s1", "a1", EventType::ToolResponse, Severity::Info, json!({}), Some(e1.hash.clone()));
        store.append_event(&e2).await.unwrap();

        let engine = DiagnosticsEngine::new(store);
        let timeline = engine.timeline("t1", "s1").await.unwrap();
        assert!(timeline.chain_valid);
    }

    #[tokio::test]
    async fn reflect_cost_analysis_sums_per_agent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.append_event(&event("s1", "a1", EventType::CostTracked, Severity::Info, json!({"costUsd": 1.0}), None)).await.unwrap();
        store.append_event(&event("s2", "a2", EventType::CostTracked, Severity::Info, json!({"costUsd": 2.0}), None)).await.unwrap();

        let engine = DiagnosticsEngine::new(store);
        let result = engine.reflect("t1", ReflectionAnalysis::CostAnalysis, None, None, None, 10).await.unwrap();
        assert_eq!(result["total_cost_usd"], 3.0);
    }

    #[tokio::test]
    async fn reflect_tool_sequences_counts_bigrams_within_session() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.append_event(&event("s1", "a1", EventType::ToolCall, Severity::Info, json!({"tool": "search"}), None)).await.unwrap();
        store.append_event(&event("s1", "a1", EventType::ToolCall, Severity::Info, json!({"tool": "summarize"}), None)).await.unwrap();

        let engine = DiagnosticsEngine::new(store);
        let result = engine.reflect("t1", ReflectionAnalysis::ToolSequences, None, None, None, 10).await.unwrap();
        let sequences = result["sequences"].as_array().unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0]["from"], "search");
        assert_eq!(sequences[0]["to"], "summarize");
    }
}
