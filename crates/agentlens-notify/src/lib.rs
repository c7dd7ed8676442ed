//! # AgentLens Notify
//!
//! Notification channel providers (webhook, Slack, PagerDuty, email), the
//! SSRF guard outbound calls must clear, and the router that resolves
//! destinations, groups rapid-fire firings, and logs deliveries.

pub mod circuit_breaker;
pub mod provider;
pub mod providers;
pub mod router;
pub mod ssrf;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, RetryPolicy};
pub use provider::{ChannelProvider, DeliveryResult, NotifyPayload, ProviderError};
pub use providers::{EmailProvider, PagerDutyProvider, SlackProvider, WebhookProvider};
pub use router::{Destination, NotificationRouter};

use std::sync::Arc;

/// Builds the standard provider set (spec §4.10: webhook, Slack, PagerDuty
/// always available; email only when SMTP credentials are configured).
pub fn default_providers(
    allow_internal_destinations: bool,
    email: Option<EmailProvider>,
) -> Vec<Arc<dyn ChannelProvider>> {
    let mut providers: Vec<Arc<dyn ChannelProvider>> = vec![
        Arc::new(WebhookProvider::new(allow_internal_destinations)),
        Arc::new(SlackProvider::new(allow_internal_destinations)),
        Arc::new(PagerDutyProvider::default()),
    ];
    if let Some(email) = email {
        providers.push(Arc::new(email));
    }
    providers
}
