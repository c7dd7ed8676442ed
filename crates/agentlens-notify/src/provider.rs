//! Channel provider trait and delivery payload/result types (spec §4.10).

use agentlens_types::{ChannelType, NotificationChannel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub rule_id: Option<Uuid>,
    pub rule_type: String,
    pub title: String,
    pub message: String,
    /// Grouped items, when the router coalesced multiple firings into one
    /// delivery (spec §4.10 grouping buffer). Empty for a single-item send.
    pub grouped_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub attempt: u32,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn ok(attempt: u32, http_status: Option<u16>) -> Self {
        Self { success: true, attempt, http_status, error: None }
    }

    pub fn failed(attempt: u32, http_status: Option<u16>, error: impl Into<String>) -> Self {
        Self { success: false, attempt, http_status, error: Some(error.into()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("ssrf guard rejected destination: {0}")]
    Ssrf(#[from] crate::ssrf::SsrfError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("channel config invalid: {0}")]
    BadConfig(String),
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Sends `payload` through `channel`. Implementations own their own
    /// retry policy; the router calls this once per delivery attempt.
    async fn send(&self, channel: &NotificationChannel, payload: &NotifyPayload) -> DeliveryResult;
}
