//! Alert and guardrail rules (spec §3, §4.8, §4.9). Both are periodic
//! evaluators over rolling windows; alerts only notify, guardrails mutate
//! agent state. Struct shape follows the teacher's `OptimizationRule`
//! (id + description + confidence-like threshold + provenance timestamp).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    ErrorRateExceeds,
    CostExceeds,
    LatencyExceeds,
    Custom { expression: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub enabled: bool,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub window_minutes: u32,
    #[serde(default)]
    pub scope: RuleScope,
    pub notify_channels: Vec<String>,
    pub cooldown_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub tenant_id: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailConditionType {
    ErrorRateThreshold,
    CostThreshold,
    LatencyThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailActionType {
    PauseAgent,
    DowngradeModel,
    Notify,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRule {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub enabled: bool,
    pub condition_type: GuardrailConditionType,
    pub condition_config: serde_json::Value,
    pub action_type: GuardrailActionType,
    pub action_config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub cooldown_minutes: u32,
    pub dry_run: bool,
}

/// Per-rule runtime state, updated every evaluator tick whether or not the
/// rule fires (spec §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub current_value: f64,
}

impl GuardrailState {
    /// True while the rule is inside its cooldown window (P6).
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown_minutes: u32) -> bool {
        match self.last_triggered_at {
            Some(last) => now < last + chrono::Duration::minutes(cooldown_minutes as i64),
            None => false,
        }
    }
}
