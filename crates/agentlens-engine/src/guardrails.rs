//! Guardrail engine (spec §4.9, C10): the same periodic-ticker shape as
//! `alerts`, but firing rules mutate agent state instead of only notifying.

use agentlens_notify::{Destination, NotificationRouter};
use agentlens_store::{EventFilter, GuardrailRuleStore, Store};
use agentlens_types::{
    Agent, Event, EventType, GuardrailActionType, GuardrailConditionType, GuardrailRule, Result,
    Severity,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use ulid::Ulid;
use uuid::Uuid;

pub const DEFAULT_EVALUATION_INTERVAL_SECS: u64 = 60;

pub struct GuardrailEngine {
    store: Arc<dyn Store>,
    router: Arc<NotificationRouter>,
    interval: Duration,
}

impl GuardrailEngine {
    pub fn new(store: Arc<dyn Store>, router: Arc<NotificationRouter>) -> Self {
        Self { store, router, interval: Duration::from_secs(DEFAULT_EVALUATION_INTERVAL_SECS) }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

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

    pub async fn evaluate_tenant(&self, tenant_id: &str) {
        let rules = match GuardrailRuleStore::list_enabled(&*self.store, tenant_id).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "failed to list guardrail rules");
                return;
            }
        };

        for rule in rules {
            if let Err(e) = self.evaluate_rule(tenant_id, &rule).await {
                tracing::warn!(tenant_id, rule_id = %rule.id, error = %e, "guardrail rule evaluation failed");
            }
        }
    }

    async fn evaluate_rule(&self, tenant_id: &str, rule: &GuardrailRule) -> Result<()> {
        let now = Utc::now();
        let mut state = self.store.get_state(tenant_id, rule.id).await?;
        let current_value = self.compute_value(tenant_id, rule, now).await?;
        state.current_value = current_value;
        state.last_evaluated_at = Some(now);

        let threshold = rule
            .condition_config
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::INFINITY);

        let should_fire = current_value > threshold && !state.in_cooldown(now, rule.cooldown_minutes);

        if should_fire {
            state.last_triggered_at = Some(now);
            state.trigger_count += 1;
        }
        self.store.save_state(tenant_id, rule.id, &state).await?;

        if !should_fire {
            return Ok(());
        }

        let message = format!("{} crossed threshold: {:.3} > {:.3}", rule.name, current_value, threshold);

        if rule.dry_run {
            tracing::info!(tenant_id, rule_id = %rule.id, action = ?rule.action_type, "dry-run guardrail would have fired: {}", message);
            return Ok(());
        }

        self.apply_action(tenant_id, rule, &message).await
    }

    async fn apply_action(&self, tenant_id: &str, rule: &GuardrailRule, message: &str) -> Result<()> {
        match rule.action_type {
            GuardrailActionType::PauseAgent => {
                let Some(agent_id) = &rule.agent_id else {
                    return Ok(());
                };
                if let Some(mut agent) = self.store.get_agent(tenant_id, agent_id).await? {
                    agent.paused = true;
                    self.store.upsert_agent(&agent).await?;
                }
            }
            GuardrailActionType::DowngradeModel => {
                let Some(agent_id) = &rule.agent_id else {
                    return Ok(());
                };
                let model = rule.action_config.get("model").and_then(|v| v.as_str()).map(str::to_string);
                if let (Some(mut agent), Some(model)) = (self.store.get_agent(tenant_id, agent_id).await?, model) {
                    agent.model_override = Some(model);
                    self.store.upsert_agent(&agent).await?;
                }
            }
            GuardrailActionType::Notify => {
                let destination = rule
                    .action_config
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .map(parse_destination)
                    .unwrap_or(Destination::RawWebhookUrl(String::new()));
                self.router
                    .notify(tenant_id, Some(rule.id), "guardrail_rule", &rule.name, message.to_string(), destination)
                    .await?;
            }
            GuardrailActionType::Log => {
                let event = log_event(tenant_id, rule, message);
                self.store.append_event(&event).await?;
            }
        }
        Ok(())
    }

    async fn compute_value(&self, tenant_id: &str, rule: &GuardrailRule, now: chrono::DateTime<Utc>) -> Result<f64> {
        let window_minutes = rule.condition_config.get("windowMinutes").and_then(|v| v.as_u64()).unwrap_or(60);
        let since = now - chrono::Duration::minutes(window_minutes as i64);
        let filter = EventFilter {
            agent_id: rule.agent_id.clone(),
            since: Some(since),
            until: Some(now),
            limit: u32::MAX,
            ..Default::default()
        };
        let events = self.store.query_events(tenant_id, &filter).await?;

        Ok(match rule.condition_type {
            GuardrailConditionType::ErrorRateThreshold => {
                if events.is_empty() {
                    0.0
                } else {
                    let failures = events.iter().filter(|e| e.severity.is_failure() || e.event_type == EventType::ToolError).count();
                    failures as f64 / events.len() as f64
                }
            }
            GuardrailConditionType::CostThreshold => {
                events.iter().filter(|e| e.event_type == EventType::CostTracked).filter_map(|e| e.payload.get("costUsd").and_then(|v| v.as_f64())).sum()
            }
            GuardrailConditionType::LatencyThreshold => {
                let durations: Vec<f64> = events
                    .iter()
                    .filter(|e| e.event_type == EventType::ToolResponse)
                    .filter_map(|e| e.payload.get("durationMs").and_then(|v| v.as_f64()))
                    .collect();
                if durations.is_empty() {
                    0.0
                } else {
                    durations.iter().sum::<f64>() / durations.len() as f64
                }
            }
        })
    }
}

fn log_event(tenant_id: &str, rule: &GuardrailRule, message: &str) -> Event {
    let mut event = Event {
        id: Ulid::new(),
        tenant_id: tenant_id.to_string(),
        timestamp: Utc::now(),
        session_id: format!("guardrail_{}", rule.id),
        agent_id: rule.agent_id.clone().unwrap_or_default(),
        event_type: EventType::Custom,
        severity: Severity::Warning,
        payload: serde_json::json!({ "guardrailRuleId": rule.id, "message": message }),
        metadata: None,
        prev_hash: None,
        hash: String::new(),
    };
    event.hash = event.compute_hash();
    event
}

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
    use agentlens_types::Session;

    fn rule(action_type: GuardrailActionType, agent_id: Option<&str>, dry_run: bool) -> GuardrailRule {
        GuardrailRule {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            name: "guard".into(),
            enabled: true,
            condition_type: GuardrailConditionType::ErrorRateThreshold,
            condition_config: serde_json::json!({ "threshold": 0.5, "windowMinutes": 60 }),
            action_type,
            action_config: serde_json::json!({}),
            agent_id: agent_id.map(str::to_string),
            cooldown_minutes: 5,
            dry_run,
        }
    }

    fn make_event(tenant_id: &str, event_type: EventType, severity: Severity) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: tenant_id.to_string(),
            timestamp: Utc::now(),
            session_id: "s1".into(),
            agent_id: "a1".into(),
            event_type,
            severity,
            payload: serde_json::json!({}),
            metadata: None,
            prev_hash: None,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    #[tokio::test]
    async fn pause_agent_sets_paused_flag() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        store.upsert_session(&Session::new("t1", "s1", "a1", Utc::now())).await.unwrap();
        store.upsert_agent(&Agent::new("t1", "a1", Utc::now())).await.unwrap();
        for _ in 0..3 {
            store.append_event(&make_event("t1", EventType::ToolError, Severity::Error)).await.unwrap();
        }
        store.append_event(&make_event("t1", EventType::ToolCall, Severity::Info)).await.unwrap();

        let router = Arc::new(NotificationRouter::new(Arc::clone(&store), vec![]));
        let engine = GuardrailEngine::new(Arc::clone(&store), router);
        let r = rule(GuardrailActionType::PauseAgent, Some("a1"), false);
        engine.evaluate_rule("t1", &r).await.unwrap();

        let agent = store.get_agent("t1", "a1").await.unwrap().unwrap();
        assert!(agent.paused);
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate_agent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        store.upsert_session(&Session::new("t1", "s1", "a1", Utc::now())).await.unwrap();
        store.upsert_agent(&Agent::new("t1", "a1", Utc::now())).await.unwrap();
        for _ in 0..3 {
            store.append_event(&make_event("t1", EventType::ToolError, Severity::Error)).await.unwrap();
        }

        let router = Arc::new(NotificationRouter::new(Arc::clone(&store), vec![]));
        let engine = GuardrailEngine::new(Arc::clone(&store), router);
        let r = rule(GuardrailActionType::PauseAgent, Some("a1"), true);
        engine.evaluate_rule("t1", &r).await.unwrap();

        let agent = store.get_agent("t1", "a1").await.unwrap().unwrap();
        assert!(!agent.paused);
    }

    #[tokio::test]
    async fn state_updates_every_tick_even_without_firing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        store.upsert_session(&Session::new("t1", "s1", "a1", Utc::now())).await.unwrap();
        store.upsert_agent(&Agent::new("t1", "a1", Utc::now())).await.unwrap();
        store.append_event(&make_event("t1", EventType::ToolCall, Severity::Info)).await.unwrap();

        let router = Arc::new(NotificationRouter::new(Arc::clone(&store), vec![]));
        let engine = GuardrailEngine::new(Arc::clone(&store), router);
        let r = rule(GuardrailActionType::Log, Some("a1"), false);
        engine.evaluate_rule("t1", &r).await.unwrap();

        let state = store.get_state("t1", r.id).await.unwrap();
        assert!(state.last_evaluated_at.is_some());
        assert_eq!(state.current_value, 0.0);
    }
}
