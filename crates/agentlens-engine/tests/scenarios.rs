//! End-to-end scenario tests wired against the real ingest pipeline, alert
//! engine, benchmark engine, and embedding queue over `MemoryStore` — the
//! acceptance scenarios from the observability backend's testable-properties
//! section, exercised through the actual crate boundaries rather than a
//! single function in isolation.

use agentlens_engine::alerts::AlertEngine;
use agentlens_engine::benchmark::BenchmarkEngine;
use agentlens_engine::bus::EventBus;
use agentlens_engine::embedding::{EmbeddingQueue, MockEmbeddingService};
use agentlens_engine::ingest::IngestPipeline;
use agentlens_notify::NotificationRouter;
use agentlens_store::{MemoryStore, Store};
use agentlens_types::{AlertCondition, AlertRule, Benchmark, BenchmarkStatus, BenchmarkVariant, Metric, RuleScope, Session, SessionStatus};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

fn ingest_event(session_id: &str, agent_id: &str, event_type: &str, severity: Option<&str>, payload: serde_json::Value) -> agentlens_types::IngestEvent {
    agentlens_types::IngestEvent {
        session_id: session_id.to_string(),
        agent_id: agent_id.to_string(),
        event_type: event_type.to_string(),
        timestamp: None,
        severity: severity.map(str::to_string),
        payload,
        metadata: None,
    }
}

fn pipeline(store: Arc<dyn Store>) -> IngestPipeline {
    let bus = Arc::new(EventBus::new(256));
    let embeddings = EmbeddingQueue::new(Arc::new(MockEmbeddingService::new(4)), store.clone(), 1000);
    IngestPipeline::new(store, bus, embeddings)
}

/// S1: two events batched for a session starting empty chain with
/// `prevHash=null` -> second event's `prevHash` -> session rolled up to
/// `eventCount=2`, `status=active`.
#[tokio::test]
async fn s1_batch_ingest_chains_and_rolls_up_session() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let pipeline = pipeline(store.clone());

    let refs = pipeline
        .ingest(
            "acme",
            vec![
                ingest_event("s1", "agent-1", "tool_call", None, serde_json::json!({"tool": "search"})),
                ingest_event("s1", "agent-1", "tool_response", None, serde_json::json!({"tool": "search"})),
            ],
        )
        .await
        .unwrap();
    assert_eq!(refs.len(), 2);

    let events = store.session_events("acme", "s1").await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[0].prev_hash.is_none());
    assert_eq!(events[1].prev_hash, Some(events[0].hash.clone()));
    assert_ne!(events[0].hash, events[1].hash);

    let session = store.get_session("acme", "s1").await.unwrap().unwrap();
    assert_eq!(session.aggregates.event_count, 2);
    assert_eq!(session.status, SessionStatus::Active);
}

/// S2: a critical-severity event flips the session to `error`; the
/// `error_rate_exceeds threshold=0` rule fires exactly once across two
/// evaluator ticks inside the cooldown window.
#[tokio::test]
async fn s2_critical_event_trips_session_and_alert_fires_once_per_cooldown() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let pipeline = pipeline(store.clone());

    pipeline
        .ingest("acme", vec![ingest_event("s2", "agent-1", "tool_error", Some("critical"), serde_json::json!({"tool": "search"}))])
        .await
        .unwrap();

    let session = store.get_session("acme", "s2").await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Error);

    let rule = AlertRule {
        id: Uuid::new_v4(),
        tenant_id: "acme".to_string(),
        name: "error rate".to_string(),
        enabled: true,
        condition: AlertCondition::ErrorRateExceeds,
        threshold: 0.0,
        window_minutes: 60,
        scope: RuleScope::default(),
        notify_channels: vec!["https://example.com/hook".to_string()],
        cooldown_minutes: 5,
    };
    store.save(&rule).await.unwrap();

    let router = Arc::new(NotificationRouter::new(store.clone(), vec![]));
    let engine = AlertEngine::new(store.clone(), router);

    engine.evaluate_tenant("acme").await;
    let history = store.history("acme", rule.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);

    // A second tick lands inside the 5-minute cooldown and must not add a row.
    engine.evaluate_tenant("acme").await;
    let history = store.history("acme", rule.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

/// S3: two variants, 40 sessions each, `avg_cost` separated by several
/// standard deviations -> the cheaper variant wins with a high-confidence
/// p-value and a summary naming it the winner.
#[tokio::test]
async fn s3_benchmark_declares_winner_on_separated_cost_distributions() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());

    // Deterministic jitter (no RNG dependency, no test flakiness): an
    // Irwin-Hall-ish sum of a few cheap oscillations centered on zero.
    let jitter = |i: usize, amplitude: f64| {
        let x = i as f64;
        amplitude * ((x * 0.9).sin() + (x * 2.3).cos() + (x * 5.1).sin()) / 3.0
    };

    for i in 0..40 {
        let mut s = Session::new("acme", format!("a-{i}"), "agent-1", Utc::now());
        s.status = SessionStatus::Completed;
        s.tags = vec!["v-A".to_string()];
        s.aggregates.total_cost_usd = (0.10 + jitter(i, 0.02)).max(0.0);
        store.upsert_session(&s).await.unwrap();
    }
    for i in 0..40 {
        let mut s = Session::new("acme", format!("b-{i}"), "agent-1", Utc::now());
        s.status = SessionStatus::Completed;
        s.tags = vec!["v-B".to_string()];
        s.aggregates.total_cost_usd = (0.05 + jitter(i, 0.02)).max(0.0);
        store.upsert_session(&s).await.unwrap();
    }

    let benchmark = Benchmark {
        id: Uuid::new_v4(),
        tenant_id: "acme".to_string(),
        name: "cost shootout".to_string(),
        status: BenchmarkStatus::Running,
        metrics: vec![Metric::AvgCost],
        min_sessions_per_variant: 30,
        variants: vec![
            BenchmarkVariant { name: "A".to_string(), tag: "v-A".to_string(), sort_order: 0 },
            BenchmarkVariant { name: "B".to_string(), tag: "v-B".to_string(), sort_order: 1 },
        ],
    };

    let engine = BenchmarkEngine::new(store);
    let report = engine.run("acme", &benchmark).await.unwrap();

    assert_eq!(report.variants[0].session_count, 40);
    assert_eq!(report.variants[1].session_count, 40);

    let comparison = report.comparisons.iter().find(|c| c.metric == Metric::AvgCost).unwrap();
    assert_eq!(comparison.winner.as_deref(), Some("B"));
    assert!(comparison.p_value < 0.001, "expected p<0.001, got {}", comparison.p_value);
    assert_eq!(comparison.confidence_stars, "★★★");
    assert!(report.summary.contains("outperforms"), "summary was: {}", report.summary);
}

/// S4: the same content submitted first as an event, then as a lesson,
/// dedupes to a single embedding row whose source reflects the later write.
#[tokio::test]
async fn s4_identical_content_as_event_then_lesson_dedupes_to_one_row() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let queue = EmbeddingQueue::new(Arc::new(MockEmbeddingService::new(8)), store.clone(), 10);

    queue.enqueue_event("acme", "evt-1".to_string(), "hello".to_string()).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    queue.enqueue_lesson("acme", "lesson-1".to_string(), "hello".to_string()).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let all = store.all("acme").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].source_type, agentlens_types::SourceType::Lesson);
    assert_eq!(all[0].source_id, "lesson-1");
}

/// S6: two concurrent batches for the same session both land, the hash
/// chain holds over the merged timeline, and the session lock serialized
/// the two `chain_and_insert` calls rather than letting them interleave.
#[tokio::test]
async fn s6_concurrent_batches_for_same_session_preserve_chain_integrity() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let pipeline = Arc::new(pipeline(store.clone()));

    let p1 = pipeline.clone();
    let p2 = pipeline.clone();
    let batch_a = async move {
        p1.ingest("acme", vec![ingest_event("s6", "agent-1", "tool_call", None, serde_json::json!({"n": "a1"})), ingest_event("s6", "agent-1", "tool_response", None, serde_json::json!({"n": "a2"}))])
            .await
    };
    let batch_b = async move {
        p2.ingest("acme", vec![ingest_event("s6", "agent-1", "tool_call", None, serde_json::json!({"n": "b1"})), ingest_event("s6", "agent-1", "tool_response", None, serde_json::json!({"n": "b2"}))])
            .await
    };

    let (res_a, res_b) = tokio::join!(batch_a, batch_b);
    let refs_a = res_a.unwrap();
    let refs_b = res_b.unwrap();
    assert_eq!(refs_a.len(), 2);
    assert_eq!(refs_b.len(), 2);

    let events = store.session_events("acme", "s6").await.unwrap();
    assert_eq!(events.len(), 4);

    // The chain holds end to end: every event but the first has a
    // `prev_hash` equal to its immediate predecessor's hash, and no two
    // events share a hash.
    assert!(events[0].prev_hash.is_none());
    for i in 1..events.len() {
        assert_eq!(events[i].prev_hash, Some(events[i - 1].hash.clone()));
    }
    let hashes: std::collections::HashSet<&str> = events.iter().map(|e| e.hash.as_str()).collect();
    assert_eq!(hashes.len(), events.len());

    let session = store.get_session("acme", "s6").await.unwrap().unwrap();
    assert_eq!(session.aggregates.event_count, 4);
}
