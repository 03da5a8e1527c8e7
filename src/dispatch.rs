//! Webhook fan-out delivery.
//!
//! One dispatch issues one HTTP POST per matching subscriber, concurrently.
//! Message relays are awaited in full before the caller acknowledges the
//! originating transport; status notifications are fire-and-forget. Delivery
//! is single-attempt: no retry, no backoff, no durable queue. Failures land
//! in the [`LogRing`] and never touch instance state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::logring::{DeliveryRecord, DestinationResult, LogRing};
use crate::types::{EventKind, MessageEnvelope, StatusEvent, Webhook};

/// HTTP connect timeout for subscriber calls.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Fans canonical events out to subscriber URLs.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    ring: Arc<LogRing>,
}

impl WebhookDispatcher {
    /// Dispatcher recording into `ring`, with a per-delivery `timeout`.
    pub fn new(ring: Arc<LogRing>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self { client, ring }
    }

    /// The ring this dispatcher records into.
    pub fn ring(&self) -> &Arc<LogRing> {
        &self.ring
    }

    /// Relay an inbound message to every `message`-subscribed webhook,
    /// awaiting the whole batch. Returns the recorded attempt, or `None`
    /// when no subscriber matched.
    pub async fn dispatch_message(
        &self,
        envelope: &MessageEnvelope,
        hooks: &[Webhook],
    ) -> Option<DeliveryRecord> {
        let targets: Vec<String> = hooks
            .iter()
            .filter(|w| w.events.contains(&EventKind::Message))
            .map(|w| w.url.clone())
            .collect();
        if targets.is_empty() {
            debug!(instance = %envelope.instance_id, "no message subscribers");
            return None;
        }

        let data = serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null);
        let results = self
            .deliver_batch(&envelope.instance_id, EventKind::Message, &data, targets)
            .await;

        let record = DeliveryRecord::message(
            &envelope.instance_id,
            envelope.direction,
            &envelope.phone,
            envelope.kind,
            results,
        );
        self.ring.push(record.clone()).await;
        Some(record)
    }

    /// Notify every `status`-subscribed webhook of a transition without
    /// blocking the state machine.
    pub fn dispatch_status(&self, instance_id: &str, event: &StatusEvent, hooks: &[Webhook]) {
        let targets: Vec<String> = hooks
            .iter()
            .filter(|w| w.events.contains(&EventKind::Status))
            .map(|w| w.url.clone())
            .collect();
        if targets.is_empty() {
            return;
        }

        let this = self.clone();
        let instance_id = instance_id.to_owned();
        let data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        tokio::spawn(async move {
            let results = this
                .deliver_batch(&instance_id, EventKind::Status, &data, targets)
                .await;
            let record = DeliveryRecord::status_event(&instance_id, results);
            this.ring.push(record).await;
        });
    }

    /// POST the event to every target concurrently, single attempt each.
    async fn deliver_batch(
        &self,
        instance_id: &str,
        event: EventKind,
        data: &serde_json::Value,
        targets: Vec<String>,
    ) -> Vec<DestinationResult> {
        let body = json!({
            "event": event,
            "instanceId": instance_id,
            "timestamp": Utc::now(),
            "data": data,
        });

        let mut set = JoinSet::new();
        for (index, url) in targets.into_iter().enumerate() {
            let client = self.client.clone();
            let body = body.clone();
            let instance_id = instance_id.to_owned();
            set.spawn(async move {
                let result = client
                    .post(&url)
                    .header("X-Webhook-Event", event.as_str())
                    .header("X-Instance-Id", &instance_id)
                    .json(&body)
                    .send()
                    .await;
                let outcome = match result {
                    Ok(resp) => {
                        let status = resp.status();
                        DestinationResult {
                            target: url,
                            ok: status.is_success(),
                            detail: Some(status.to_string()),
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "webhook delivery failed");
                        DestinationResult {
                            target: url,
                            ok: false,
                            detail: Some(e.to_string()),
                        }
                    }
                };
                (index, outcome)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => warn!(error = %e, "webhook delivery task failed"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }
}
