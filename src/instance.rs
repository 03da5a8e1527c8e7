//! One managed account: connection state machine, reconnection, sends.
//!
//! All mutable state is owned by the instance and touched only through its
//! own methods; the registry never reaches inside. The embedded family
//! drives the machine through pushed [`TransportEvent`]s consumed by a pump
//! task; the gateway family is probed on demand since the gateway holds the
//! session externally.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::WebhookDispatcher;
use crate::error::Error;
use crate::normalizer;
use crate::reconnect::{ReconnectPolicy, ReconnectStep};
use crate::transport::{
    CloseReason, PairingArtifact, SendReceipt, TransportAdapter, TransportEvent, TransportFamily,
};
use crate::types::{AccountUser, InstanceState, StatusEvent, Webhook};

/// Connection view guarded by one mutex.
#[derive(Default)]
struct ConnState {
    state: InstanceState,
    artifact: Option<PairingArtifact>,
    user: Option<AccountUser>,
    last_attempt: Option<tokio::time::Instant>,
}

/// Point-in-time public view of an instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    /// Registry id.
    pub instance_id: String,
    /// Adapter family.
    pub family: TransportFamily,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Convenience flag: `state == connected`.
    pub connected: bool,
    /// Retries scheduled since the last successful open.
    pub reconnect_attempts: u32,
    /// Linked account, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AccountUser>,
    /// Registered webhook count.
    pub webhook_count: usize,
}

/// One managed account on the messaging network.
pub struct Instance {
    id: String,
    family: TransportFamily,
    adapter: Arc<dyn TransportAdapter>,
    policy: ReconnectPolicy,
    connect_cooldown: Duration,
    conn: Mutex<ConnState>,
    connecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    webhooks: Mutex<Vec<Webhook>>,
    dispatcher: WebhookDispatcher,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
}

impl Instance {
    /// Build an instance around an adapter. `webhooks` carries subscriptions
    /// restored from persistence.
    pub fn new(
        id: String,
        family: TransportFamily,
        adapter: Arc<dyn TransportAdapter>,
        policy: ReconnectPolicy,
        connect_cooldown: Duration,
        dispatcher: WebhookDispatcher,
        webhooks: Vec<Webhook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            family,
            adapter,
            policy,
            connect_cooldown,
            conn: Mutex::new(ConnState::default()),
            connecting: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            webhooks: Mutex::new(webhooks),
            dispatcher,
            reconnect_task: Mutex::new(None),
            pump_task: Mutex::new(None),
        })
    }

    /// Registry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adapter family.
    pub fn family(&self) -> TransportFamily {
        self.family
    }

    /// Consume the embedded push-event stream on a background task.
    pub async fn start_event_pump(self: &Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let instance = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                instance.apply_event(event).await;
            }
            debug!(instance = %instance.id, "transport event stream ended");
        });
        *self.pump_task.lock().await = Some(handle);
    }

    /// Begin a connection attempt.
    ///
    /// Rejected with [`Error::Busy`] while another attempt is in flight and
    /// with [`Error::Throttled`] inside the cooldown window. Rejections do
    /// not reset the cooldown clock.
    pub async fn connect(self: &Arc<Self>) -> Result<(), Error> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(instance = %self.id, "connect rejected, attempt already in flight");
            return Err(Error::Busy);
        }

        let now = tokio::time::Instant::now();
        {
            let mut conn = self.conn.lock().await;
            if let Some(last) = conn.last_attempt {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < self.connect_cooldown {
                    let remaining = self
                        .connect_cooldown
                        .checked_sub(elapsed)
                        .unwrap_or_default();
                    let retry_after_secs = remaining
                        .as_secs()
                        .saturating_add(u64::from(remaining.subsec_nanos() > 0));
                    self.connecting.store(false, Ordering::SeqCst);
                    debug!(instance = %self.id, retry_after_secs, "connect throttled");
                    return Err(Error::Throttled { retry_after_secs });
                }
            }
            conn.last_attempt = Some(now);
            conn.state = InstanceState::Connecting;
        }
        self.notify(StatusEvent::state(InstanceState::Connecting)).await;
        info!(instance = %self.id, family = self.family.as_str(), "connecting");

        match self.adapter.connect().await {
            Ok(()) => {
                if self.family == TransportFamily::Gateway {
                    // No push channel: resolve the outcome with a probe.
                    let connected = self
                        .adapter
                        .status()
                        .await
                        .map(|s| s.connected)
                        .unwrap_or(false);
                    let state = if connected {
                        InstanceState::Connected
                    } else {
                        InstanceState::Disconnected
                    };
                    self.connecting.store(false, Ordering::SeqCst);
                    let mut conn = self.conn.lock().await;
                    conn.state = state;
                    drop(conn);
                    self.notify(StatusEvent::state(state)).await;
                }
                // Embedded sessions stay `Connecting` until the runtime
                // pushes a pairing, open or close event.
                Ok(())
            }
            Err(e) => {
                self.connecting.store(false, Ordering::SeqCst);
                let mut conn = self.conn.lock().await;
                conn.state = InstanceState::Disconnected;
                drop(conn);
                self.notify(StatusEvent::state(InstanceState::Disconnected))
                    .await;
                warn!(instance = %self.id, error = %e, "connect failed");
                Err(e.into())
            }
        }
    }

    /// Apply one transport push event to the state machine.
    ///
    /// This is the single entry point for the embedded event pump; the
    /// gateway family never produces these.
    pub async fn apply_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::PairingReady(artifact) => self.on_pairing(artifact).await,
            TransportEvent::Open { user } => self.on_open(user).await,
            TransportEvent::Closed { reason } => self.on_close(reason).await,
            TransportEvent::Message { raw } => {
                if let Err(e) = self.ingest_raw(&raw).await {
                    warn!(instance = %self.id, error = %e, "inbound message relay failed");
                }
            }
        }
    }

    async fn on_pairing(&self, artifact: PairingArtifact) {
        info!(instance = %self.id, "pairing artifact ready");
        {
            let mut conn = self.conn.lock().await;
            conn.state = InstanceState::PairingReady;
            conn.artifact = Some(artifact.clone());
        }
        self.notify(StatusEvent {
            status: InstanceState::PairingReady,
            artifact: Some(artifact),
            user: None,
            reason: None,
        })
        .await;
    }

    async fn on_open(&self, user: Option<AccountUser>) {
        info!(instance = %self.id, "connected");
        self.connecting.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        {
            let mut conn = self.conn.lock().await;
            conn.state = InstanceState::Connected;
            conn.artifact = None;
            conn.user = user.clone();
        }
        self.notify(StatusEvent {
            status: InstanceState::Connected,
            artifact: None,
            user,
            reason: None,
        })
        .await;
    }

    async fn on_close(self: &Arc<Self>, reason: CloseReason) {
        let logged_out = reason.is_logged_out();
        let state = if logged_out {
            InstanceState::LoggedOut
        } else {
            InstanceState::Disconnected
        };
        info!(
            instance = %self.id,
            reason = %reason.describe(),
            reconnect = !logged_out,
            "session closed"
        );
        self.connecting.store(false, Ordering::SeqCst);
        {
            let mut conn = self.conn.lock().await;
            conn.state = state;
            conn.user = None;
        }
        self.notify(StatusEvent {
            status: state,
            artifact: None,
            user: None,
            reason: Some(reason.describe()),
        })
        .await;

        if !logged_out {
            self.schedule_reconnect().await;
        }
    }

    /// Queue the next reconnect attempt per the two-timescale schedule.
    async fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = self
            .reconnect_attempts
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        let step = self.policy.step(attempt);
        let instance = Arc::clone(self);

        let handle = tokio::spawn(async move {
            match step {
                ReconnectStep::Retry(delay) => {
                    info!(
                        instance = %instance.id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "reconnect scheduled"
                    );
                    tokio::time::sleep(delay).await;
                }
                ReconnectStep::ExtendedCooldown(cooldown) => {
                    warn!(
                        instance = %instance.id,
                        cooldown_secs = cooldown.as_secs(),
                        "fast reconnect schedule exhausted, entering extended cooldown"
                    );
                    tokio::time::sleep(cooldown).await;
                    instance.reconnect_attempts.store(0, Ordering::SeqCst);
                    instance.conn.lock().await.last_attempt = None;
                }
            }
            if let Err(e) = instance.connect().await {
                warn!(instance = %instance.id, error = %e, "scheduled reconnect rejected");
            }
        });

        let mut slot = self.reconnect_task.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    /// Normalize one raw provider payload and relay it to subscribers,
    /// awaiting the full fan-out before returning. The return is the
    /// transport ack point for the embedded push path and the HTTP response
    /// point for gateway callbacks.
    pub async fn ingest_raw(&self, raw: &serde_json::Value) -> Result<(), Error> {
        let Some(normalized) = normalizer::normalize(&self.id, raw) else {
            debug!(instance = %self.id, "raw event is not a user message");
            return Ok(());
        };
        if normalized.generated_id {
            debug!(instance = %self.id, "message arrived without a provider id");
        }
        let hooks = self.webhooks.lock().await.clone();
        let _ = self
            .dispatcher
            .dispatch_message(&normalized.envelope, &hooks)
            .await;
        Ok(())
    }

    /// Current pairing artifact: the one pushed by the runtime, or a live
    /// fetch from the adapter.
    pub async fn pairing_artifact(&self) -> Result<PairingArtifact, Error> {
        if let Some(artifact) = self.conn.lock().await.artifact.clone() {
            return Ok(artifact);
        }
        Ok(self.adapter.pairing_artifact().await?)
    }

    /// Send a text message. Fails fast with [`Error::NotConnected`] while a
    /// reconnect is pending; nothing queues.
    pub async fn send_text(&self, target: &str, body: &str) -> Result<SendReceipt, Error> {
        self.ensure_sendable().await?;
        Ok(self.adapter.send_text(target, body).await?)
    }

    /// Send an image by URL with an optional caption.
    pub async fn send_image(
        &self,
        target: &str,
        image_url: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, Error> {
        self.ensure_sendable().await?;
        Ok(self.adapter.send_image(target, image_url, caption).await?)
    }

    /// Send an audio clip by URL.
    pub async fn send_audio(&self, target: &str, audio_url: &str) -> Result<SendReceipt, Error> {
        self.ensure_sendable().await?;
        Ok(self.adapter.send_audio(target, audio_url).await?)
    }

    /// Send a document by URL with an optional file name.
    pub async fn send_document(
        &self,
        target: &str,
        document_url: &str,
        filename: Option<&str>,
    ) -> Result<SendReceipt, Error> {
        self.ensure_sendable().await?;
        Ok(self
            .adapter
            .send_document(target, document_url, filename)
            .await?)
    }

    /// Ask the provider to restart the session in place. Credentials and
    /// webhooks are untouched; state changes arrive as push events (embedded)
    /// or on the next probe (gateway).
    pub async fn restart(&self) -> Result<(), Error> {
        self.adapter.restart().await?;
        info!(instance = %self.id, "transport restart requested");
        Ok(())
    }

    /// Embedded sessions are gated on the local state machine; gateway sends
    /// go straight to the gateway, which owns connection state.
    async fn ensure_sendable(&self) -> Result<(), Error> {
        if self.family != TransportFamily::Embedded {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        if conn.state == InstanceState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Refresh gateway-family state from a live probe. Embedded instances
    /// are push-driven and skip this.
    pub async fn refresh(&self) {
        if self.family != TransportFamily::Gateway {
            return;
        }
        match self.adapter.status().await {
            Ok(status) => {
                let new_state = if status.connected {
                    InstanceState::Connected
                } else {
                    InstanceState::Disconnected
                };
                let changed = {
                    let mut conn = self.conn.lock().await;
                    let changed = conn.state != new_state;
                    conn.state = new_state;
                    changed
                };
                if changed {
                    self.notify(StatusEvent::state(new_state)).await;
                }
            }
            Err(e) => debug!(instance = %self.id, error = %e, "gateway status probe failed"),
        }
    }

    /// Current public view.
    pub async fn snapshot(&self) -> InstanceSnapshot {
        let (state, user) = {
            let conn = self.conn.lock().await;
            (conn.state, conn.user.clone())
        };
        InstanceSnapshot {
            instance_id: self.id.clone(),
            family: self.family,
            state,
            connected: state == InstanceState::Connected,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            user,
            webhook_count: self.webhooks.lock().await.len(),
        }
    }

    /// Register a subscriber. Persistence is the registry's concern.
    pub async fn add_webhook(&self, webhook: Webhook) {
        self.webhooks.lock().await.push(webhook);
    }

    /// Remove a subscriber by id. Returns whether it existed.
    pub async fn remove_webhook(&self, webhook_id: &str) -> bool {
        let mut hooks = self.webhooks.lock().await;
        let before = hooks.len();
        hooks.retain(|w| w.id != webhook_id);
        hooks.len() < before
    }

    /// Registered subscribers, in registration order.
    pub async fn webhooks(&self) -> Vec<Webhook> {
        self.webhooks.lock().await.clone()
    }

    /// Tear down for a forced reset: cancel pending retries, disconnect,
    /// zero the counters and clear the throttle so the follow-up connect is
    /// admitted immediately.
    pub async fn prepare_reset(&self) {
        if let Some(task) = self.reconnect_task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.adapter.disconnect().await {
            debug!(instance = %self.id, error = %e, "disconnect during reset failed");
        }
        self.connecting.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        {
            let mut conn = self.conn.lock().await;
            conn.state = InstanceState::Disconnected;
            conn.artifact = None;
            conn.user = None;
            conn.last_attempt = None;
        }
        self.notify(StatusEvent {
            status: InstanceState::Disconnected,
            artifact: None,
            user: None,
            reason: Some("forced reset".to_owned()),
        })
        .await;
    }

    /// Reconnect after `delay`, outside the failure-driven schedule.
    pub async fn restart_after(self: &Arc<Self>, delay: Duration) {
        let instance = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = instance.connect().await {
                warn!(instance = %instance.id, error = %e, "reconnect after reset rejected");
            }
        });
        let mut slot = self.reconnect_task.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    /// Stop all background work and disconnect. Called on removal; pending
    /// reconnects must never fire against a deleted instance.
    pub async fn shutdown(&self) {
        if let Some(task) = self.reconnect_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.pump_task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.adapter.disconnect().await {
            debug!(instance = %self.id, error = %e, "disconnect during shutdown failed");
        }
        info!(instance = %self.id, "instance shut down");
    }

    async fn notify(&self, event: StatusEvent) {
        let hooks = self.webhooks.lock().await.clone();
        self.dispatcher.dispatch_status(&self.id, &event, &hooks);
    }
}
