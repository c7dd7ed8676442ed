//! Runtime configuration loaded from environment variables (spec §6 "Config
//! via environment"). Grounded on the teacher's `LlmConfig`/`VexConfig`
//! `from_env()` pattern — one field per variable, `Option<String>` for
//! secrets, typed parsing with a sensible default for everything else.

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: String, message: String },
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            message: format!("expected a value parseable as {}", std::any::type_name::<T>()),
        }),
        Err(_) => Ok(default),
    }
}

/// Webhook ingest secrets, one per known source (spec §6 "Webhook ingest").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSecrets {
    pub formbridge: Option<String>,
    pub agentgate: Option<String>,
    pub generic: Option<String>,
}

impl WebhookSecrets {
    fn from_env() -> Self {
        Self {
            formbridge: env::var("AGENTLENS_WEBHOOK_SECRET_FORMBRIDGE").ok(),
            agentgate: env::var("AGENTLENS_WEBHOOK_SECRET_AGENTGATE").ok(),
            generic: env::var("AGENTLENS_WEBHOOK_SECRET_GENERIC").ok(),
        }
    }

    pub fn for_source(&self, source: &str) -> Option<&str> {
        match source {
            "formbridge" => self.formbridge.as_deref(),
            "agentgate" => self.agentgate.as_deref(),
            "generic" => self.generic.as_deref(),
            _ => None,
        }
    }
}

/// Embedding-service endpoint/model config (spec §6, C7's `HttpEmbeddingService`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: Option<String>,
    pub model: String,
}

impl EmbeddingConfig {
    fn from_env() -> Self {
        Self {
            endpoint: env::var("AGENTLENS_EMBEDDING_ENDPOINT").ok(),
            model: env::var("AGENTLENS_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        }
    }
}

/// The full process configuration (spec §6: "server port, database
/// path/URL, CORS origin, auth-disabled flag, Redis URL, backpressure
/// threshold, webhook secrets, embedding-service endpoint/model"). `redis_url`
/// is read and threaded through even though no component currently dials
/// Redis (§4.12's quota fast path uses an in-process cache instead, see
/// `limits.rs`) — the variable is part of the documented external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub port: u16,
    pub database_url: String,
    pub cors_origin: Option<String>,
    pub auth_disabled: bool,
    pub redis_url: Option<String>,
    pub backpressure_threshold: u32,
    pub webhook_secrets: WebhookSecrets,
    pub embedding: EmbeddingConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_env("AGENTLENS_PORT", 8080u16)?,
            database_url: env::var("AGENTLENS_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://agentlens.db".to_string()),
            cors_origin: env::var("AGENTLENS_CORS_ORIGIN").ok(),
            auth_disabled: env::var("AGENTLENS_AUTH_DISABLED")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
            redis_url: env::var("AGENTLENS_REDIS_URL").ok(),
            backpressure_threshold: parse_env("AGENTLENS_BACKPRESSURE_THRESHOLD", 10_000u32)?,
            webhook_secrets: WebhookSecrets::from_env(),
            embedding: EmbeddingConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        // Not asserting on real env (parallel test runs share it); just
        // confirm parsing of an unset var falls back rather than erroring.
        assert_eq!(parse_env::<u16>("AGENTLENS_PORT_NOT_SET_XYZ", 8080).unwrap(), 8080);
    }

    #[test]
    fn webhook_secret_lookup_is_per_source() {
        let secrets = WebhookSecrets { formbridge: Some("fb".into()), agentgate: None, generic: None };
        assert_eq!(secrets.for_source("formbridge"), Some("fb"));
        assert_eq!(secrets.for_source("agentgate"), None);
        assert_eq!(secrets.for_source("unknown"), None);
    }
}
