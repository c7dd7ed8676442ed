//! # AgentLens Types
//!
//! Core domain types shared by every AgentLens crate: the event model and
//! its chained hasher, session/agent aggregates, embeddings, rules, and the
//! error taxonomy all components propagate.

pub mod agent;
pub mod api_key;
pub mod benchmark;
pub mod channel;
pub mod embedding;
pub mod error;
pub mod event;
pub mod hash;
pub mod lesson;
pub mod org_plan;
pub mod rule;
pub mod session;

pub use agent::Agent;
pub use api_key::ApiKey;
pub use benchmark::{Benchmark, BenchmarkStatus, BenchmarkVariant, ComparisonKind, Metric};
pub use channel::{ChannelType, NotificationChannel};
pub use embedding::{cosine_similarity, Embedding, SourceType};
pub use error::{AgentLensError, ErrorDetail, Result};
pub use event::{
    Event, EventType, IngestEvent, IngestedEventRef, Severity, MAX_BATCH_SIZE,
    MAX_PAYLOAD_FIELD_BYTES,
};
pub use hash::{canonical_json, constant_time_eq, hash_canonical, sha256_hex, HexHash};
pub use lesson::{Importance, Lesson};
pub use org_plan::{OrgPlan, PlanTier};
pub use rule::{
    AlertCondition, AlertHistoryEntry, AlertRule, GuardrailActionType, GuardrailConditionType,
    GuardrailRule, GuardrailState, RuleScope,
};
pub use session::{Session, SessionAggregates, SessionOutcome, SessionStatus, SessionSummary};
