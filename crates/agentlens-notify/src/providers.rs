//! Per-channel-type provider implementations (spec §4.10).

use crate::circuit_breaker::{CircuitBreaker, CircuitConfig, RetryPolicy};
use crate::provider::{ChannelProvider, DeliveryResult, NotifyPayload};
use crate::ssrf;
use agentlens_types::{ChannelType, NotificationChannel};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Client {
    Client::builder().timeout(REQUEST_TIMEOUT).build().expect("reqwest client builder")
}

fn config_str<'a>(channel: &'a NotificationChannel, key: &str) -> Option<&'a str> {
    channel.config.get(key).and_then(|v| v.as_str())
}

/// Generic webhook provider: POSTs the payload as JSON, retries `[1s, 5s,
/// 30s]` per `RetryPolicy::default()`, and trips a circuit breaker after
/// repeated failures so a dead endpoint stops eating retry budget.
pub struct WebhookProvider {
    client: Client,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    allow_internal: bool,
}

impl WebhookProvider {
    pub fn new(allow_internal: bool) -> Self {
        Self {
            client: http_client(),
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::new("webhook", CircuitConfig::default()),
            allow_internal,
        }
    }
}

#[async_trait]
impl ChannelProvider for WebhookProvider {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    async fn send(&self, channel: &NotificationChannel, payload: &NotifyPayload) -> DeliveryResult {
        let Some(url) = config_str(channel, "url") else {
            return DeliveryResult::failed(0, None, "webhook channel missing url");
        };
        if let Err(e) = ssrf::check_destination(url, self.allow_internal).await {
            return DeliveryResult::failed(0, None, e.to_string());
        }
        if !self.breaker.allow().await {
            return DeliveryResult::failed(0, None, "circuit open, delivery skipped");
        }

        let client = &self.client;
        let result = self
            .retry
            .execute(|attempt| {
                let client = client.clone();
                let url = url.to_string();
                let body = serde_json::json!({
                    "ruleId": payload.rule_id,
                    "ruleType": payload.rule_type,
                    "title": payload.title,
                    "message": payload.message,
                    "grouped": payload.grouped_items,
                });
                async move {
                    let resp = client.post(&url).json(&body).send().await.map_err(|e| e.to_string())?;
                    let status = resp.status();
                    if status.is_success() {
                        Ok((attempt, status.as_u16()))
                    } else {
                        Err(format!("webhook returned status {status}"))
                    }
                }
            })
            .await;

        match result {
            Ok((attempt, status)) => {
                self.breaker.record_success().await;
                DeliveryResult::ok(attempt + 1, Some(status))
            }
            Err(e) => {
                self.breaker.record_failure().await;
                DeliveryResult::failed((self.retry.delays.len() + 1) as u32, None, e)
            }
        }
    }
}

/// Slack incoming-webhook provider. Honors `Retry-After` on HTTP 429 instead
/// of the generic retry schedule.
pub struct SlackProvider {
    client: Client,
    allow_internal: bool,
}

impl SlackProvider {
    pub fn new(allow_internal: bool) -> Self {
        Self { client: http_client(), allow_internal }
    }
}

#[async_trait]
impl ChannelProvider for SlackProvider {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Slack
    }

    async fn send(&self, channel: &NotificationChannel, payload: &NotifyPayload) -> DeliveryResult {
        let Some(url) = config_str(channel, "webhook_url").or_else(|| config_str(channel, "url")) else {
            return DeliveryResult::failed(0, None, "slack channel missing webhook_url");
        };
        if let Err(e) = ssrf::check_destination(url, self.allow_internal).await {
            return DeliveryResult::failed(0, None, e.to_string());
        }

        let body = serde_json::json!({ "text": format!("*{}*\n{}", payload.title, payload.message) });

        for attempt in 0..2u32 {
            let resp = match self.client.post(url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => return DeliveryResult::failed(attempt + 1, None, e.to_string()),
            };
            let status = resp.status();
            if status.is_success() {
                return DeliveryResult::ok(attempt + 1, Some(status.as_u16()));
            }
            if status.as_u16() == 429 {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }
            return DeliveryResult::failed(attempt + 1, Some(status.as_u16()), format!("slack returned {status}"));
        }
        DeliveryResult::failed(2, Some(429), "slack rate limited after retry-after wait")
    }
}

/// PagerDuty Events API v2 provider (`routing_key` identifies the service).
pub struct PagerDutyProvider {
    client: Client,
}

impl Default for PagerDutyProvider {
    fn default() -> Self {
        Self { client: http_client() }
    }
}

#[async_trait]
impl ChannelProvider for PagerDutyProvider {
    fn channel_type(&self) -> ChannelType {
        ChannelType::PagerDuty
    }

    async fn send(&self, channel: &NotificationChannel, payload: &NotifyPayload) -> DeliveryResult {
        let Some(routing_key) = config_str(channel, "routing_key") else {
            return DeliveryResult::failed(0, None, "pagerduty channel missing routing_key");
        };

        let body = serde_json::json!({
            "routing_key": routing_key,
            "event_action": "trigger",
            "payload": {
                "summary": payload.title,
                "source": "agentlens",
                "severity": "error",
                "custom_details": { "message": payload.message, "grouped": payload.grouped_items },
            }
        });

        match self
            .client
            .post("https://events.pagerduty.com/v2/enqueue")
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => DeliveryResult::ok(1, Some(resp.status().as_u16())),
            Ok(resp) => DeliveryResult::failed(1, Some(resp.status().as_u16()), "pagerduty enqueue rejected"),
            Err(e) => DeliveryResult::failed(1, None, e.to_string()),
        }
    }
}

/// SMTP email provider (spec §4.10 "Email uses SMTP").
pub struct EmailProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailProvider {
    pub fn new(smtp_host: &str, smtp_user: &str, smtp_password: &str, from: &str) -> Result<Self, String> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| e.to_string())?
            .credentials(Credentials::new(smtp_user.to_string(), smtp_password.to_string()))
            .build();
        let from = from.parse().map_err(|e: lettre::address::AddressError| e.to_string())?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl ChannelProvider for EmailProvider {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(&self, channel: &NotificationChannel, payload: &NotifyPayload) -> DeliveryResult {
        let Some(to) = config_str(channel, "to") else {
            return DeliveryResult::failed(0, None, "email channel missing to address");
        };
        let to_mailbox: Mailbox = match to.parse() {
            Ok(m) => m,
            Err(e) => return DeliveryResult::failed(0, None, format!("invalid to address: {e}")),
        };

        let message = match Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(&payload.title)
            .body(payload.message.clone())
        {
            Ok(m) => m,
            Err(e) => return DeliveryResult::failed(0, None, e.to_string()),
        };

        match self.transport.send(message).await {
            Ok(_) => DeliveryResult::ok(1, None),
            Err(e) => DeliveryResult::failed(1, None, e.to_string()),
        }
    }
}
