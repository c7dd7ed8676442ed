//! Notification routing: resolves a raw webhook URL or a stored channel,
//! groups rapid-fire firings of the same rule, dispatches through the
//! matching provider, and appends an entry to the delivery log (spec §4.10).

use crate::provider::{ChannelProvider, DeliveryResult, NotifyPayload};
use agentlens_store::{ChannelStore, NotificationLogEntry, Store, SUMMARY_MAX_LEN};
use agentlens_types::{AgentLensError, ChannelType, NotificationChannel, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Where a notification should go: a raw URL (ad hoc webhook) or a channel
/// resolved from the store by id.
#[derive(Debug, Clone)]
pub enum Destination {
    RawWebhookUrl(String),
    Channel(Uuid),
}

const GROUP_MAX_ITEMS: usize = 10;
const GROUP_WINDOW: Duration = Duration::from_secs(30);

struct PendingGroup {
    items: Vec<String>,
    first_seen: tokio::time::Instant,
    rule_type: String,
    title: String,
    destination: Destination,
}

/// Buffers notifications per `ruleId`, flushing when either
/// `GROUP_MAX_ITEMS` is reached or `GROUP_WINDOW` elapses since the first
/// buffered item, whichever comes first.
pub struct NotificationRouter {
    store: Arc<dyn Store>,
    providers: HashMap<ChannelType, Arc<dyn ChannelProvider>>,
    pending: Mutex<HashMap<Uuid, PendingGroup>>,
}

impl NotificationRouter {
    pub fn new(store: Arc<dyn Store>, providers: Vec<Arc<dyn ChannelProvider>>) -> Self {
        let providers = providers.into_iter().map(|p| (p.channel_type(), p)).collect();
        Self { store, providers, pending: Mutex::new(HashMap::new()) }
    }

    async fn resolve_channel(&self, tenant_id: &str, destination: &Destination) -> Result<NotificationChannel> {
        match destination {
            Destination::RawWebhookUrl(url) => Ok(NotificationChannel {
                id: Uuid::nil(),
                tenant_id: tenant_id.to_string(),
                name: "ad-hoc".to_string(),
                channel_type: ChannelType::Webhook,
                enabled: true,
                config: serde_json::json!({ "url": url }),
            }),
            Destination::Channel(id) => ChannelStore::get(&*self.store, tenant_id, *id)
                .await?
                .ok_or_else(|| AgentLensError::NotFound(format!("channel {id} not found"))),
        }
    }

    async fn dispatch(
        &self,
        tenant_id: &str,
        rule_id: Option<Uuid>,
        destination: &Destination,
        payload: &NotifyPayload,
    ) -> Result<DeliveryResult> {
        let channel = self.resolve_channel(tenant_id, destination).await?;
        if !channel.enabled {
            return Ok(DeliveryResult::failed(0, None, "channel disabled"));
        }
        let provider = self
            .providers
            .get(&channel.channel_type)
            .ok_or_else(|| AgentLensError::validation(format!("no provider for channel type {:?}", channel.channel_type)))?;

        let result = provider.send(&channel, payload).await;

        let summary = format!(
            "status={} attempt={} http={:?} error={:?}",
            if result.success { "ok" } else { "failed" },
            result.attempt,
            result.http_status,
            result.error
        );
        let log_entry = NotificationLogEntry {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            channel_id: channel.id,
            rule_id,
            rule_type: payload.rule_type.clone(),
            sent_at: chrono::Utc::now(),
            success: result.success,
            summary: truncate_summary(&summary),
        };
        self.store.append(&log_entry).await?;
        Ok(result)
    }
}

/// Truncates `s` to at most `SUMMARY_MAX_LEN` bytes on a char boundary.
fn truncate_summary(s: &str) -> String {
    if s.len() <= SUMMARY_MAX_LEN {
        return s.to_string();
    }
    let mut end = SUMMARY_MAX_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

impl NotificationRouter {
    /// Sends `item` immediately for rules with no grouping key, or buffers it
    /// under `rule_id` per the grouping policy when one is supplied.
    pub async fn notify(
        &self,
        tenant_id: &str,
        rule_id: Option<Uuid>,
        rule_type: &str,
        title: &str,
        item: String,
        destination: Destination,
    ) -> Result<Option<DeliveryResult>> {
        let Some(rule_id) = rule_id else {
            let payload = NotifyPayload {
                rule_id: None,
                rule_type: rule_type.to_string(),
                title: title.to_string(),
                message: item,
                grouped_items: vec![],
            };
            return self.dispatch(tenant_id, None, &destination, &payload).await.map(Some);
        };

        let mut pending = self.pending.lock().await;
        let flush = match pending.get_mut(&rule_id) {
            Some(group) => {
                group.items.push(item);
                group.items.len() >= GROUP_MAX_ITEMS || group.first_seen.elapsed() >= GROUP_WINDOW
            }
            None => {
                pending.insert(
                    rule_id,
                    PendingGroup {
                        items: vec![item],
                        first_seen: tokio::time::Instant::now(),
                        rule_type: rule_type.to_string(),
                        title: title.to_string(),
                        destination,
                    },
                );
                false
            }
        };

        if !flush {
            return Ok(None);
        }
        let group = pending.remove(&rule_id).expect("just inserted or matched above");
        drop(pending);

        let payload = NotifyPayload {
            rule_id: Some(rule_id),
            rule_type: group.rule_type,
            title: group.title,
            message: format!("{} occurrences", group.items.len()),
            grouped_items: group.items,
        };
        self.dispatch(tenant_id, Some(rule_id), &group.destination, &payload).await.map(Some)
    }

    /// Flushes every group whose window has elapsed, regardless of size.
    /// Intended to be called on a periodic tick alongside the alert/guardrail
    /// tickers so a rule that fires once never waits forever for a 10th hit.
    pub async fn flush_expired(&self, tenant_id: &str) -> Result<Vec<DeliveryResult>> {
        let expired: Vec<(Uuid, PendingGroup)> = {
            let mut pending = self.pending.lock().await;
            let expired_ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, g)| g.first_seen.elapsed() >= GROUP_WINDOW)
                .map(|(id, _)| *id)
                .collect();
            expired_ids.into_iter().filter_map(|id| pending.remove(&id).map(|g| (id, g))).collect()
        };

        let mut results = Vec::with_capacity(expired.len());
        for (rule_id, group) in expired {
            let payload = NotifyPayload {
                rule_id: Some(rule_id),
                rule_type: group.rule_type,
                title: group.title,
                message: format!("{} occurrences", group.items.len()),
                grouped_items: group.items,
            };
            results.push(self.dispatch(tenant_id, Some(rule_id), &group.destination, &payload).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChannelProvider;
    use agentlens_store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelProvider for CountingProvider {
        fn channel_type(&self) -> ChannelType {
            ChannelType::Webhook
        }
        async fn send(&self, _channel: &NotificationChannel, _payload: &NotifyPayload) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            DeliveryResult::ok(1, Some(200))
        }
    }

    #[tokio::test]
    async fn ungrouped_notification_dispatches_immediately() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let router = NotificationRouter::new(store, vec![Arc::new(CountingProvider { calls: calls.clone() })]);

        let result = router
            .notify("t1", None, "alert", "CPU high", "cpu at 95%".into(), Destination::RawWebhookUrl("https://example.com/hook".into()))
            .await
            .unwrap();
        assert!(result.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn grouped_notification_buffers_until_threshold() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let router = NotificationRouter::new(store, vec![Arc::new(CountingProvider { calls: calls.clone() })]);
        let rule_id = Uuid::new_v4();
        let dest = Destination::RawWebhookUrl("https://example.com/hook".into());

        for i in 0..9 {
            let r = router
                .notify("t1", Some(rule_id), "guardrail", "repeated failure", format!("hit {i}"), dest.clone())
                .await
                .unwrap();
            assert!(r.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let r = router.notify("t1", Some(rule_id), "guardrail", "repeated failure", "hit 9".into(), dest).await.unwrap();
        assert!(r.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
