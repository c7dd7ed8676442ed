//! The canonical event shape (spec §3, §4.1).

use crate::hash::{hash_canonical, HexHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Maximum size, in bytes, of any single string field in an event payload
/// (spec §4.5 policy 2).
pub const MAX_PAYLOAD_FIELD_BYTES: usize = 64 * 1024;

/// Maximum number of events accepted in one ingest request (spec §4.5 policy 1).
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    SessionEnded,
    ToolCall,
    ToolResponse,
    ToolError,
    LlmCall,
    LlmResponse,
    Error,
    CostTracked,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    ApprovalExpired,
    FormSubmitted,
    FormCompleted,
    FormExpired,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::SessionEnded => "session_ended",
            Self::ToolCall => "tool_call",
            Self::ToolResponse => "tool_response",
            Self::ToolError => "tool_error",
            Self::LlmCall => "llm_call",
            Self::LlmResponse => "llm_response",
            Self::Error => "error",
            Self::CostTracked => "cost_tracked",
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalDenied => "approval_denied",
            Self::ApprovalExpired => "approval_expired",
            Self::FormSubmitted => "form_submitted",
            Self::FormCompleted => "form_completed",
            Self::FormExpired => "form_expired",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "session_started" => Self::SessionStarted,
            "session_ended" => Self::SessionEnded,
            "tool_call" => Self::ToolCall,
            "tool_response" => Self::ToolResponse,
            "tool_error" => Self::ToolError,
            "llm_call" => Self::LlmCall,
            "llm_response" => Self::LlmResponse,
            "error" => Self::Error,
            "cost_tracked" => Self::CostTracked,
            "approval_requested" => Self::ApprovalRequested,
            "approval_granted" => Self::ApprovalGranted,
            "approval_denied" => Self::ApprovalDenied,
            "approval_expired" => Self::ApprovalExpired,
            "form_submitted" => Self::FormSubmitted,
            "form_completed" => Self::FormCompleted,
            "form_expired" => Self::FormExpired,
            "custom" => Self::Custom,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "info" => Self::Info,
            "warning" => Self::Warning,
            "error" => Self::Error,
            "critical" => Self::Critical,
            _ => return None,
        })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

/// The persisted event. `hash`/`prev_hash` form the per-session chain (I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub prev_hash: Option<HexHash>,
    pub hash: HexHash,
}

/// The subset of event fields that feed the hash, in the fixed key order
/// required by I1: {id, timestamp, sessionId, agentId, eventType, severity,
/// payload, metadata, prevHash}. `serde`'s struct-field order does not by
/// itself guarantee JSON key order once round-tripped through `Value`, so
/// `hash_canonical` re-sorts anyway; the struct order here exists purely for
/// readability and matches the spec's documented order.
#[derive(Serialize)]
struct HashableFields<'a> {
    id: &'a Ulid,
    timestamp: &'a DateTime<Utc>,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    #[serde(rename = "eventType")]
    event_type: &'a EventType,
    severity: &'a Severity,
    payload: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
    #[serde(rename = "prevHash")]
    prev_hash: &'a Option<HexHash>,
}

impl Event {
    /// Compute the hash of this event's fields (excluding `hash` itself),
    /// per spec §4.1.
    pub fn compute_hash(&self) -> HexHash {
        hash_canonical(&HashableFields {
            id: &self.id,
            timestamp: &self.timestamp,
            session_id: &self.session_id,
            agent_id: &self.agent_id,
            event_type: &self.event_type,
            severity: &self.severity,
            payload: &self.payload,
            metadata: self.metadata.as_ref(),
            prev_hash: &self.prev_hash,
        })
    }

    /// Truncate any string fields over the payload size cap, appending the
    /// `[truncated]` sentinel (spec §4.5 policy 2). Only top-level and
    /// one-level-nested string values are inspected, matching the common
    /// shape of tool/LLM payloads.
    pub fn truncate_payload(payload: &mut serde_json::Value) {
        truncate_strings(payload);
    }
}

fn truncate_strings(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.len() > MAX_PAYLOAD_FIELD_BYTES {
                let mut truncated = truncate_to_char_boundary(s, MAX_PAYLOAD_FIELD_BYTES);
                truncated.push_str("[truncated]");
                *s = truncated;
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(truncate_strings),
        serde_json::Value::Object(map) => map.values_mut().for_each(truncate_strings),
        _ => {}
    }
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A producer's ingest request, validated and chained by the ingest pipeline
/// (spec §4.5) before becoming an `Event`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    pub session_id: String,
    pub agent_id: String,
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// The result of successfully ingesting one event, returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedEventRef {
    pub id: Ulid,
    pub hash: HexHash,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(prev_hash: Option<HexHash>) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: "t1".into(),
            timestamp: Utc::now(),
            session_id: "s1".into(),
            agent_id: "a1".into(),
            event_type: EventType::ToolCall,
            severity: Severity::Info,
            payload: json!({"tool": "search"}),
            metadata: None,
            prev_hash,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    #[test]
    fn hash_is_deterministic_across_calls() {
        let e = sample(None);
        assert_eq!(e.hash, e.compute_hash());
    }

    #[test]
    fn changing_any_field_changes_the_hash() {
        let mut e = sample(None);
        let original = e.hash.clone();
        e.severity = Severity::Critical;
        assert_ne!(original, e.compute_hash());
    }

    #[test]
    fn truncate_payload_adds_sentinel_past_bound() {
        let mut payload = json!({"text": "x".repeat(MAX_PAYLOAD_FIELD_BYTES + 10)});
        Event::truncate_payload(&mut payload);
        let text = payload["text"].as_str().unwrap();
        assert!(text.ends_with("[truncated]"));
        assert!(text.len() <= MAX_PAYLOAD_FIELD_BYTES + "[truncated]".len());
    }

    #[test]
    fn event_type_round_trips() {
        for ty in [
            EventType::SessionStarted,
            EventType::ToolError,
            EventType::FormExpired,
            EventType::Custom,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse("bogus"), None);
    }
}
