//! Agent identity (spec §3). Upserted on each session's first event;
//! guardrail actions may mutate `paused` and `model_override`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub tenant_id: String,
    pub agent_id: String,
    pub name: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub session_count: u64,
    /// Set by the `pause_agent` guardrail action; callers reading the agent
    /// check this flag before dispatching further work to it.
    pub paused: bool,
    /// Set by the `downgrade_model` guardrail action.
    pub model_override: Option<String>,
}

impl Agent {
    pub fn new(tenant_id: impl Into<String>, agent_id: impl Into<String>, seen_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            name: None,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
            session_count: 0,
            paused: false,
            model_override: None,
        }
    }
}
