//! # AgentLens API
//!
//! HTTP surface for the AgentLens observability backend.
//!
//! Features:
//! - Axum-based web server
//! - Tower middleware (bearer API-key auth, per-key rate limiting, tracing)
//! - Server-sent events for live event/session updates
//! - Webhook ingest with HMAC-SHA256 signature verification
//! - Graceful shutdown

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use server::{AgentLensServer, ServerConfig};
