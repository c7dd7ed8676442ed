//! The shared error taxonomy (spec §7), propagated unchanged from storage up
//! through the engine to the HTTP edge, where `agentlens-api` maps each
//! variant to an HTTP status.

use serde::Serialize;

/// A structured detail entry attached to a `Validation` error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentLensError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Vec<ErrorDetail>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("backpressure, retry after {retry_after_secs}s")]
    Backpressure { retry_after_secs: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("hash chain corruption: {0}")]
    Corruption(String),
}

impl AgentLensError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// The taxonomy tag used in logs and, by `agentlens-api`, in response bodies.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::Backpressure { .. } => "backpressure",
            Self::Storage(_) => "storage",
            Self::Dependency(_) => "dependency",
            Self::Corruption(_) => "corruption",
        }
    }

    /// Errors in this class are swallowed by the ingest path's best-effort
    /// post-commit side effects (spec §7: "ingest path propagates everything
    /// except `dependency`").
    pub fn is_dependency(&self) -> bool {
        matches!(self, Self::Dependency(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentLensError>;
