//! Alert engine (spec §4.8, C9): a periodic ticker that evaluates every
//! enabled rule against the event store and dispatches through the
//! notification router when a threshold is crossed.

use agentlens_notify::{Destination, NotificationRouter};
use agentlens_store::{AlertRuleStore, EventFilter, Store};
use agentlens_types::{AlertCondition, AlertHistoryEntry, AlertRule, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_EVALUATION_INTERVAL_SECS: u64 = 60;

pub struct AlertEngine {
    store: Arc<dyn Store>,
    router: Arc<NotificationRouter>,
    interval: Duration,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn Store>, router: Arc<NotificationRouter>) -> Self {
        Self { store, router, interval: Duration::from_secs(DEFAULT_EVALUATION_INTERVAL_SECS) }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs the ticker until `shutdown` resolves. Completes the current
    /// iteration before returning (spec §5 cancellation policy).
    pub async fn run(self: Arc<Self>, tenant_ids: Vec<String>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for tenant_id in &tenant_ids {
                        self.evaluate_tenant(tenant_id).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One tick's work for one tenant. A single rule's failure is logged and
    /// does not prevent the others in the same tick from evaluating.
    pub async fn evaluate_tenant(&self, tenant_id: &str) {
        let rules = match AlertRuleStore::list_enabled(&*self.store, tenant_id).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "failed to list alert rules");
                return;
            }
        };

        for rule in rules {
            if let Err(e) = self.evaluate_rule(tenant_id, &rule).await {
                tracing::warn!(tenant_id, rule_id = %rule.id, error = %e, "alert rule evaluation failed");
            }
        }
    }

    async fn evaluate_rule(&self, tenant_id: &str, rule: &AlertRule) -> Result<()> {
        let now = Utc::now();
        if let Some(last) = self.store.last_triggered_at(tenant_id, rule.id).await? {
            if last + chrono::Duration::minutes(rule.cooldown_minutes as i64) > now {
                return Ok(());
            }
        }

        let current_value = self.compute_value(tenant_id, rule, now).await?;
        if current_value <= rule.threshold {
            return Ok(());
        }

        let message = format!(
            "{} crossed threshold: {:.3} > {:.3}",
            rule.name, current_value, rule.threshold
        );
        self.store
            .append_history(&AlertHistoryEntry {
                id: Uuid::new_v4(),
                rule_id: rule.id,
                tenant_id: tenant_id.to_string(),
                triggered_at: now,
                resolved_at: None,
                current_value,
                threshold: rule.threshold,
                message: message.clone(),
            })
            .await?;

        for entry in &rule.notify_channels {
            let destination = parse_destination(entry);
            if let Err(e) = self
                .router
                .notify(tenant_id, Some(rule.id), "alert_rule", &rule.name, message.clone(), destination)
                .await
            {
                tracing::warn!(tenant_id, rule_id = %rule.id, error = %e, "alert notification dispatch failed");
            }
        }
        Ok(())
    }

    async fn compute_value(&self, tenant_id: &str, rule: &AlertRule, now: chrono::DateTime<Utc>) -> Result<f64> {
        let since = now - chrono::Duration::minutes(rule.window_minutes as i64);
        let filter = EventFilter {
            agent_id: rule.scope.agent_id.clone(),
            since: Some(since),
            until: Some(now),
            limit: u32::MAX,
            ..Default::default()
        };
        let events = self.store.query_events(tenant_id, &filter).await?;

        Ok(match &rule.condition {
            AlertCondition::ErrorRateExceeds => {
                if events.is_empty() {
                    0.0
                } else {
                    let failures = events
                        .iter()
                        .filter(|e| e.severity.is_failure() || e.event_type == agentlens_types::EventType::ToolError)
                        .count();
                    failures as f64 / events.len() as f64
                }
            }
            AlertCondition::CostExceeds => events
                .iter()
                .filter(|e| e.event_type == agentlens_types::EventType::CostTracked)
                .filter_map(|e| e.payload.get("costUsd").and_then(|v| v.as_f64()))
                .sum(),
            AlertCondition::LatencyExceeds => {
                let durations: Vec<f64> = events
                    .iter()
                    .filter(|e| e.event_type == agentlens_types::EventType::ToolResponse)
                    .filter_map(|e| e.payload.get("durationMs").and_then(|v| v.as_f64()))
                    .collect();
                if durations.is_empty() {
                    0.0
                } else {
                    durations.iter().sum::<f64>() / durations.len() as f64
                }
            }
            AlertCondition::Custom { .. } => 0.0,
        })
    }
}

/// Absolute `http(s)://` entries are raw webhooks; anything else is a
/// channel id (spec §4.10).
fn parse_destination(entry: &str) -> Destination {
    if entry.starts_with("http://") || entry.starts_with("https://") {
        Destination::RawWebhookUrl(entry.to_string())
    } else {
        Uuid::parse_str(entry).map(Destination::Channel).unwrap_or_else(|_| Destination::RawWebhookUrl(entry.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_store::MemoryStore;
    use agentlens_types::{Event, EventType, RuleScope};
    use ulid::Ulid;

    fn event(tenant_id: &str, event_type: EventType, severity: Severity, payload: serde_json::Value) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: tenant_id.to_string(),
            timestamp: Utc::now(),
            session_id: "s1".into(),
            agent_id: "a1".into(),
            event_type,
            severity,
            payload,
            metadata: None,
            prev_hash: None,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    fn rule(condition: AlertCondition, threshold: f64) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            name: "test rule".into(),
            enabled: true,
            condition,
            threshold,
            window_minutes: 60,
            scope: RuleScope::default(),
            notify_channels: vec!["https://example.com/hook".into()],
            cooldown_minutes: 5,
        }
    }

    #[tokio::test]
    async fn error_rate_condition_triggers_above_threshold() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        store.upsert_session(&agentlens_types::Session::new("t1", "s1", "a1", Utc::now())).await.unwrap();
        for _ in 0..2 {
            store
                .append_event(&event("t1", EventType::ToolError, Severity::Error, serde_json::json!({})))
                .await
                .unwrap();
        }
        store
            .append_event(&event("t1", EventType::ToolCall, Severity::Info, serde_json::json!({})))
            .await
            .unwrap();

        let notify_store: Arc<dyn Store> = Arc::clone(&store);
        let router = Arc::new(NotificationRouter::new(notify_store, vec![]));
        let engine = AlertEngine::new(store, router);
        let r = rule(AlertCondition::ErrorRateExceeds, 0.5);
        let value = engine.compute_value("t1", &r, Utc::now()).await.unwrap();
        assert!(value > 0.5);
    }

    #[tokio::test]
    async fn cost_exceeds_sums_cost_tracked_events() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        store.upsert_session(&agentlens_types::Session::new("t1", "s1", "a1", Utc::now())).await.unwrap();
        store
            .append_event(&event("t1", EventType::CostTracked, Severity::Info, serde_json::json!({"costUsd": 1.5})))
            .await
            .unwrap();
        store
            .append_event(&event("t1", EventType::CostTracked, Severity::Info, serde_json::json!({"costUsd": 2.5})))
            .await
            .unwrap();

        let notify_store: Arc<dyn Store> = Arc::clone(&store);
        let router = Arc::new(NotificationRouter::new(notify_store, vec![]));
        let engine = AlertEngine::new(store, router);
        let r = rule(AlertCondition::CostExceeds, 3.0);
        let value = engine.compute_value("t1", &r, Utc::now()).await.unwrap();
        assert_eq!(value, 4.0);
    }
}
