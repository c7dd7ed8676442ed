//! # AgentLens Engine
//!
//! Everything that runs continuously against the event store: the ingest
//! pipeline (C5), the event bus (C6), the embedding worker and recall engine
//! (C7/C8), the alert and guardrail tickers (C9/C10), the benchmark engine
//! (C12), the per-key rate limiter and org quota checker (C13), compliance
//! export (C14), and session diagnostics/replay (C15).

pub mod alerts;
pub mod benchmark;
pub mod bus;
pub mod config;
pub mod diagnostics;
pub mod embedding;
pub mod export;
pub mod guardrails;
pub mod ingest;
pub mod limits;
pub mod recall;

pub use alerts::AlertEngine;
pub use benchmark::{BenchmarkEngine, BenchmarkReport, Comparison, VariantResult};
pub use bus::{BusEvent, EventBus, Subscription};
pub use config::{ConfigError, EmbeddingConfig, EngineConfig, WebhookSecrets};
pub use diagnostics::{DiagnosticsEngine, ReflectionAnalysis, SessionTimeline};
pub use embedding::{EmbeddingQueue, EmbeddingService, HttpEmbeddingService, MockEmbeddingService};
pub use export::{ExportEngine, ExportFormat};
pub use guardrails::GuardrailEngine;
pub use ingest::IngestPipeline;
pub use limits::{KeyRateLimiter, QuotaChecker, QuotaStatus};
pub use recall::{RecallEngine, RecallHit, RecallQuery};
