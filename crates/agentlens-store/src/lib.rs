//! # AgentLens Store
//!
//! Persistence for events, sessions, agents, and every control-plane entity
//! (API keys, embeddings, lessons, alert/guardrail rules, notification
//! channels and log, benchmarks). Two backends: `memory` for tests and
//! single-process development, `sqlite` for everything else.

pub mod backend;
pub mod memory;
pub mod sqlite;

pub use backend::{
    AlertRuleStore, ApiKeyStore, BenchmarkStore, ChannelStore, EmbeddingStore, EventFilter,
    EventReader, EventWriter, GuardrailRuleStore, LessonStore, NotificationLogEntry,
    NotificationLogStore, PlanStore, SessionFilter, SessionSummaryStore, Store, SUMMARY_MAX_LEN,
};
pub use memory::MemoryStore;
pub use sqlite::{SqliteConfig, SqliteStore};
