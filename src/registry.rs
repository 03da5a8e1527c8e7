//! Keyed collection of instances and the transport-independent contract.
//!
//! The registry is an explicit context object: construct one per process (or
//! per test) and pass it around. One registry serves both adapter families;
//! the family is chosen per instance at creation time through the injected
//! [`TransportFactory`]. Metadata persistence failures are logged and
//! swallowed so they never interrupt connection lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::dispatch::WebhookDispatcher;
use crate::error::Error;
use crate::instance::{Instance, InstanceSnapshot};
use crate::logring::{DeliveryRecord, LogRing};
use crate::store::{InstanceRecord, MetaStore};
use crate::transport::{
    GatewayBinding, SendReceipt, TransportFactory, TransportFamily,
};
use crate::types::{EventKind, InstanceState, MessageKind, Webhook};

/// Delay before the reconnect that follows a forced reset.
const RESET_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Options for creating an instance.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Adapter family; defaults to the embedded stack.
    pub family: TransportFamily,
    /// Remote binding, required for gateway instances.
    pub gateway: Option<GatewayBinding>,
}

/// Aggregate connection counters across all instances.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Managed instances.
    pub total: usize,
    /// Instances with a live session.
    pub connected: usize,
    /// Instances without a session (any non-connected, non-pairing state).
    pub disconnected: usize,
    /// Instances waiting for a device link.
    pub pairing_ready: usize,
}

/// Per-target outcome of a bulk send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntry {
    /// The target as given by the caller.
    pub target: String,
    /// Whether the send was accepted by the transport.
    pub ok: bool,
    /// Error detail for failed targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a bulk send. Failures never abort the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    /// Targets attempted.
    pub total: usize,
    /// Accepted sends.
    pub sent: usize,
    /// Rejected sends.
    pub failed: usize,
    /// Per-target outcomes in input order.
    pub details: Vec<BulkEntry>,
}

/// Keyed collection of managed instances.
pub struct Registry {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    factory: Arc<dyn TransportFactory>,
    meta: MetaStore,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: WebhookDispatcher,
    ring: Arc<LogRing>,
    config: Config,
}

impl Registry {
    /// Build a registry from its collaborators and the loaded config.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        meta: MetaStore,
        credentials: Arc<dyn CredentialStore>,
        config: Config,
    ) -> Self {
        let ring = Arc::new(LogRing::new(config.dispatch.log_ring_capacity));
        let dispatcher = WebhookDispatcher::new(
            Arc::clone(&ring),
            Duration::from_secs(config.dispatch.timeout_secs),
        );
        Self {
            instances: RwLock::new(HashMap::new()),
            factory,
            meta,
            credentials,
            dispatcher,
            ring,
            config,
        }
    }

    /// The shared delivery diagnostics buffer.
    pub fn delivery_log(&self) -> Arc<LogRing> {
        Arc::clone(&self.ring)
    }

    /// Create a new instance. The id is sanitized to lowercase
    /// `[a-z0-9-]`; the sanitized id is returned and must be used for all
    /// follow-up calls.
    pub async fn create(&self, instance_id: &str, options: CreateOptions) -> Result<String, Error> {
        let id = sanitize_id(instance_id);
        if id.is_empty() {
            return Err(Error::InvalidInstanceId(instance_id.to_owned()));
        }

        let mut instances = self.instances.write().await;
        if instances.contains_key(&id) {
            return Err(Error::AlreadyExists(id));
        }

        let record = InstanceRecord::new(id.clone(), options.family, options.gateway);
        let instance = self.spawn_instance(&record, Vec::new()).await?;
        instances.insert(id.clone(), instance);
        drop(instances);

        if let Err(e) = self.meta.save_instance(&record).await {
            warn!(instance = %id, error = %e, "failed to persist instance metadata");
        }
        info!(instance = %id, family = record.family.as_str(), "instance created");
        Ok(id)
    }

    /// Build the transport and instance for a record and start its pump.
    async fn spawn_instance(
        &self,
        record: &InstanceRecord,
        webhooks: Vec<Webhook>,
    ) -> Result<Arc<Instance>, Error> {
        let built = self
            .factory
            .build(&record.id, record.family, record.gateway.as_ref())?;
        let instance = Instance::new(
            record.id.clone(),
            record.family,
            built.adapter,
            self.config.reconnect.policy(),
            self.config.reconnect.connect_cooldown(),
            self.dispatcher.clone(),
            webhooks,
        );
        if let Some(events) = built.events {
            instance.start_event_pump(events).await;
        }
        Ok(instance)
    }

    /// Fetch a live instance handle.
    pub async fn lookup(&self, instance_id: &str) -> Result<Arc<Instance>, Error> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(instance_id.to_owned()))
    }

    /// Begin a connection attempt on an instance.
    pub async fn connect(&self, instance_id: &str) -> Result<(), Error> {
        self.lookup(instance_id).await?.connect().await
    }

    /// Current state of an instance. Gateway instances are probed live.
    pub async fn status(&self, instance_id: &str) -> Result<InstanceSnapshot, Error> {
        let instance = self.lookup(instance_id).await?;
        instance.refresh().await;
        Ok(instance.snapshot().await)
    }

    /// Current pairing artifact of an instance.
    pub async fn pairing_artifact(
        &self,
        instance_id: &str,
    ) -> Result<crate::transport::PairingArtifact, Error> {
        self.lookup(instance_id).await?.pairing_artifact().await
    }

    /// Send a text message through an instance.
    pub async fn send_text(
        &self,
        instance_id: &str,
        target: &str,
        body: &str,
    ) -> Result<SendReceipt, Error> {
        let instance = self.lookup(instance_id).await?;
        let result = instance.send_text(target, body).await;
        self.record_send(instance_id, target, MessageKind::Text, &result)
            .await;
        result
    }

    /// Send an image by URL with an optional caption.
    pub async fn send_image(
        &self,
        instance_id: &str,
        target: &str,
        image_url: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, Error> {
        let instance = self.lookup(instance_id).await?;
        let result = instance.send_image(target, image_url, caption).await;
        self.record_send(instance_id, target, MessageKind::Image, &result)
            .await;
        result
    }

    /// Send an audio clip by URL.
    pub async fn send_audio(
        &self,
        instance_id: &str,
        target: &str,
        audio_url: &str,
    ) -> Result<SendReceipt, Error> {
        let instance = self.lookup(instance_id).await?;
        let result = instance.send_audio(target, audio_url).await;
        self.record_send(instance_id, target, MessageKind::Audio, &result)
            .await;
        result
    }

    /// Send a document by URL with an optional file name.
    pub async fn send_document(
        &self,
        instance_id: &str,
        target: &str,
        document_url: &str,
        filename: Option<&str>,
    ) -> Result<SendReceipt, Error> {
        let instance = self.lookup(instance_id).await?;
        let result = instance.send_document(target, document_url, filename).await;
        self.record_send(instance_id, target, MessageKind::Document, &result)
            .await;
        result
    }

    /// Send one text to many targets sequentially, pausing between sends.
    /// Per-target failures are reported, never fatal to the batch.
    pub async fn send_bulk(
        &self,
        instance_id: &str,
        targets: &[String],
        body: &str,
    ) -> Result<BulkReport, Error> {
        let instance = self.lookup(instance_id).await?;
        let delay = Duration::from_millis(self.config.dispatch.bulk_delay_ms);
        let mut details = Vec::with_capacity(targets.len());
        let mut sent = 0usize;
        let mut failed = 0usize;

        for (index, target) in targets.iter().enumerate() {
            let result = instance.send_text(target, body).await;
            self.record_send(instance_id, target, MessageKind::Text, &result)
                .await;
            match result {
                Ok(_) => {
                    sent = sent.saturating_add(1);
                    details.push(BulkEntry {
                        target: target.clone(),
                        ok: true,
                        error: None,
                    });
                }
                Err(e) => {
                    failed = failed.saturating_add(1);
                    details.push(BulkEntry {
                        target: target.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
            if index.saturating_add(1) < targets.len() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(BulkReport {
            total: targets.len(),
            sent,
            failed,
            details,
        })
    }

    /// Register a webhook subscriber on an instance. An empty filter
    /// subscribes to both messages and status transitions.
    pub async fn register_webhook(
        &self,
        instance_id: &str,
        url: &str,
        events: Vec<EventKind>,
    ) -> Result<Webhook, Error> {
        if url::Url::parse(url).is_err() {
            return Err(Error::InvalidWebhookUrl(url.to_owned()));
        }
        let instance = self.lookup(instance_id).await?;
        let events = if events.is_empty() {
            vec![EventKind::Message, EventKind::Status]
        } else {
            events
        };
        let webhook = Webhook {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_owned(),
            events,
            created_at: chrono::Utc::now(),
        };
        instance.add_webhook(webhook.clone()).await;
        if let Err(e) = self.meta.save_webhook(instance_id, &webhook).await {
            warn!(instance = %instance_id, error = %e, "failed to persist webhook");
        }
        info!(instance = %instance_id, webhook = %webhook.id, url, "webhook registered");
        Ok(webhook)
    }

    /// Webhooks registered on an instance.
    pub async fn list_webhooks(&self, instance_id: &str) -> Result<Vec<Webhook>, Error> {
        Ok(self.lookup(instance_id).await?.webhooks().await)
    }

    /// Remove a webhook subscriber.
    pub async fn remove_webhook(&self, instance_id: &str, webhook_id: &str) -> Result<(), Error> {
        let instance = self.lookup(instance_id).await?;
        if !instance.remove_webhook(webhook_id).await {
            return Err(Error::WebhookNotFound(webhook_id.to_owned()));
        }
        match self.meta.delete_webhook(instance_id, webhook_id).await {
            Ok(_) => {}
            Err(e) => warn!(instance = %instance_id, error = %e, "failed to delete persisted webhook"),
        }
        Ok(())
    }

    /// Ask the provider to restart an instance's session in place, without
    /// touching credentials or subscriptions.
    pub async fn restart(&self, instance_id: &str) -> Result<(), Error> {
        self.lookup(instance_id).await?.restart().await
    }

    /// Deliver an externally received raw event to an instance. This is how
    /// gateway callbacks enter; it normalizes and fans out identically to
    /// the embedded push path.
    pub async fn ingest_raw_event(
        &self,
        instance_id: &str,
        raw: &serde_json::Value,
    ) -> Result<(), Error> {
        self.lookup(instance_id).await?.ingest_raw(raw).await
    }

    /// Remove an instance, cancelling its background work. With
    /// `wipe_credentials` the whole credential namespace is cleared too.
    pub async fn remove(&self, instance_id: &str, wipe_credentials: bool) -> Result<(), Error> {
        let instance = self
            .instances
            .write()
            .await
            .remove(instance_id)
            .ok_or_else(|| Error::NotFound(instance_id.to_owned()))?;
        instance.shutdown().await;

        if wipe_credentials {
            if let Err(e) = self.credentials.wipe(instance_id).await {
                warn!(instance = %instance_id, error = %e, "credential wipe failed");
            }
        }
        if let Err(e) = self.meta.delete_instance(instance_id).await {
            warn!(instance = %instance_id, error = %e, "failed to delete instance metadata");
        }
        info!(instance = %instance_id, wipe_credentials, "instance removed");
        Ok(())
    }

    /// Disconnect, wipe credentials and schedule a fresh connect. The only
    /// way out of `logged_out`.
    pub async fn force_reset(&self, instance_id: &str) -> Result<(), Error> {
        let instance = self.lookup(instance_id).await?;
        instance.prepare_reset().await;
        if let Err(e) = self.credentials.wipe(instance_id).await {
            warn!(instance = %instance_id, error = %e, "credential wipe failed");
        }
        instance.restart_after(RESET_RECONNECT_DELAY).await;
        info!(instance = %instance_id, "forced reset started");
        Ok(())
    }

    /// Snapshot every instance.
    pub async fn list(&self) -> Vec<InstanceSnapshot> {
        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(instances.len());
        for instance in instances {
            snapshots.push(instance.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        snapshots
    }

    /// Aggregate connection counters.
    pub async fn stats(&self) -> RegistryStats {
        let snapshots = self.list().await;
        let mut stats = RegistryStats {
            total: snapshots.len(),
            connected: 0,
            disconnected: 0,
            pairing_ready: 0,
        };
        for snapshot in snapshots {
            match snapshot.state {
                InstanceState::Connected => stats.connected = stats.connected.saturating_add(1),
                InstanceState::PairingReady => {
                    stats.pairing_ready = stats.pairing_ready.saturating_add(1);
                }
                _ => stats.disconnected = stats.disconnected.saturating_add(1),
            }
        }
        stats
    }

    /// Rebuild every persisted instance and start reconnecting. Called once
    /// at boot; per-instance failures are logged, never fatal. Returns the
    /// number of instances restored.
    pub async fn load_persisted(&self) -> usize {
        let records = match self.meta.list_instances().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to load persisted instances");
                return 0;
            }
        };

        let mut restored = 0usize;
        for record in records {
            {
                let instances = self.instances.read().await;
                if instances.contains_key(&record.id) {
                    continue;
                }
            }
            let webhooks = match self.meta.webhooks_for(&record.id).await {
                Ok(webhooks) => webhooks,
                Err(e) => {
                    warn!(instance = %record.id, error = %e, "failed to load webhooks");
                    Vec::new()
                }
            };
            let instance = match self.spawn_instance(&record, webhooks).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!(instance = %record.id, error = %e, "failed to restore instance");
                    continue;
                }
            };
            self.instances
                .write()
                .await
                .insert(record.id.clone(), Arc::clone(&instance));
            restored = restored.saturating_add(1);

            if let Err(e) = instance.connect().await {
                warn!(instance = %record.id, error = %e, "reconnect at boot rejected");
            }
        }

        info!(restored, "persisted instances loaded");
        restored
    }

    /// Stop every instance's background work. Used on graceful shutdown.
    pub async fn shutdown(&self) {
        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        for instance in instances {
            instance.shutdown().await;
        }
    }

    async fn record_send(
        &self,
        instance_id: &str,
        target: &str,
        kind: MessageKind,
        result: &Result<SendReceipt, Error>,
    ) {
        let phone: String = target.chars().filter(char::is_ascii_digit).collect();
        let record = match result {
            Ok(receipt) => DeliveryRecord::outbound_send(
                instance_id,
                &phone,
                kind,
                true,
                Some(receipt.provider_message_id.clone()).filter(|id| !id.is_empty()),
            ),
            Err(e) => {
                DeliveryRecord::outbound_send(instance_id, &phone, kind, false, Some(e.to_string()))
            }
        };
        self.ring.push(record).await;
    }
}

/// Lowercase the id and replace anything outside `[a-z0-9-]` with `-`.
fn sanitize_id(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let sanitized: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    sanitized.trim_matches('-').to_owned()
}
