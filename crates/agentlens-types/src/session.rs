//! Session aggregates (spec §3) rolled up from the events in a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAggregates {
    pub event_count: u64,
    pub tool_call_count: u64,
    pub error_count: u64,
    pub llm_call_count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub tenant_id: String,
    pub session_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    #[serde(flatten)]
    pub aggregates: SessionAggregates,
    pub tags: Vec<String>,
}

impl Session {
    pub fn new(tenant_id: impl Into<String>, session_id: impl Into<String>, agent_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            agent_name: None,
            started_at,
            ended_at: None,
            status: SessionStatus::Active,
            aggregates: SessionAggregates::default(),
            tags: Vec::new(),
        }
    }

    pub fn eventless(&self) -> bool {
        self.aggregates.event_count == 0
    }
}

/// A natural-language rollup of a completed session (spec §3 "Session Summary").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub tenant_id: String,
    pub session_id: String,
    pub summary: String,
    pub topic_tags: Vec<String>,
    pub tool_sequence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    pub outcome: SessionOutcome,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Success,
    Failure,
    Partial,
    Unknown,
}
