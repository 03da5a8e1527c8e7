//! Embedded-family adapter: fronts the local protocol runtime.
//!
//! The wire protocol itself lives in a separate local runtime process; this
//! adapter drives it over HTTP on localhost and long-polls its event feed.
//! Credential blobs flow both ways: the stored namespace is shipped with
//! `connect` so a session resumes without re-pairing, and credential-update
//! events coming back from the runtime are persisted before anything else
//! sees them. Connection and message events are forwarded to the owning
//! instance over a bounded channel; the next poll request is held until the
//! instance drains the previous batch, which is the transport ack point.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::types::AccountUser;

use super::{
    CloseReason, PairingArtifact, SendReceipt, TransportAdapter, TransportError, TransportEvent,
    TransportStatus,
};

/// HTTP connect timeout for runtime calls.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal runtime operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout for the event feed.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Initial reconnect backoff for the event feed (milliseconds).
const POLL_BACKOFF_START_MS: u64 = 1000;

/// Maximum reconnect backoff for the event feed (milliseconds).
const POLL_BACKOFF_MAX_MS: u64 = 30_000;

/// Adapter for one instance hosted by the local protocol runtime.
pub struct EmbeddedTransport {
    client: reqwest::Client,
    base: String,
    instance_id: String,
    credentials: Arc<dyn CredentialStore>,
    listener: JoinHandle<()>,
}

/// Response envelope from the runtime HTTP API.
#[derive(Deserialize)]
struct RuntimeResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    code: Option<String>,
}

impl<T> RuntimeResponse<T> {
    fn into_data(self) -> Result<T, TransportError> {
        if self.success {
            if let Some(data) = self.data {
                return Ok(data);
            }
        }
        Err(map_runtime_error(self.code.as_deref(), self.error))
    }

    fn into_ok(self) -> Result<(), TransportError> {
        if self.success {
            return Ok(());
        }
        Err(map_runtime_error(self.code.as_deref(), self.error))
    }
}

/// Map a structured runtime error onto the transport taxonomy.
fn map_runtime_error(code: Option<&str>, message: Option<String>) -> TransportError {
    let message = message.unwrap_or_else(|| "runtime returned no error detail".to_owned());
    match code {
        Some("not_connected") => TransportError::NotConnected,
        Some("invalid_target") => TransportError::InvalidTarget(message),
        Some("no_artifact") => TransportError::ArtifactNotAvailable,
        _ => TransportError::Rejected(message),
    }
}

/// Event shapes on the runtime's poll feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    /// Pairing artifact issued.
    Qr {
        code: Option<String>,
        image: Option<String>,
    },
    /// Session established.
    Open { user: Option<AccountUser> },
    /// Session closed.
    Close {
        reason: Option<String>,
        #[serde(default)]
        logged_out: bool,
    },
    /// Raw inbound provider payload.
    Message { payload: serde_json::Value },
    /// Updated session credential blob, base64-encoded.
    Creds { key: String, value: String },
}

#[derive(Deserialize)]
struct SendData {
    #[serde(rename = "messageId")]
    message_id: String,
}

#[derive(Deserialize)]
struct ArtifactData {
    code: Option<String>,
    image: Option<String>,
}

impl EmbeddedTransport {
    /// Start the adapter for `instance_id` and return it together with the
    /// push-event stream the owning instance must consume.
    ///
    /// The event listener task starts immediately and is aborted when the
    /// adapter is dropped.
    pub fn start(
        runtime_url: String,
        instance_id: String,
        credentials: Arc<dyn CredentialStore>,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });

        let base = format!(
            "{}/instances/{instance_id}",
            runtime_url.trim_end_matches('/')
        );

        // Capacity 1: the next poll request is held back until the instance
        // has drained the previous batch.
        let (tx, rx) = mpsc::channel(1);
        let listener = spawn_event_listener(
            format!("{base}/events/poll"),
            instance_id.clone(),
            Arc::clone(&credentials),
            tx,
        );

        (
            Self {
                client,
                base,
                instance_id,
                credentials,
                listener,
            },
            rx,
        )
    }

    async fn post_data<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}{path}", self.base);
        let resp = self.client.post(&url).json(body).send().await?;
        let envelope: RuntimeResponse<T> = resp.json().await?;
        envelope.into_data()
    }

    async fn post_ok(&self, path: &str, body: &serde_json::Value) -> Result<(), TransportError> {
        let url = format!("{}{path}", self.base);
        let resp = self.client.post(&url).json(body).send().await?;
        let envelope: RuntimeResponse<serde_json::Value> = resp.json().await?;
        envelope.into_ok()
    }

    /// Build the base64 credential snapshot shipped with `connect`.
    async fn credential_snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut snapshot = serde_json::Map::new();
        match self.credentials.load_namespace(&self.instance_id).await {
            Ok(entries) => {
                for (key, blob) in entries {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(blob);
                    snapshot.insert(key, serde_json::Value::String(encoded));
                }
            }
            Err(e) => {
                // Without stored material the runtime falls back to pairing.
                warn!(instance = %self.instance_id, error = %e, "failed to load session credentials");
            }
        }
        snapshot
    }
}

impl Drop for EmbeddedTransport {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl TransportAdapter for EmbeddedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let snapshot = self.credential_snapshot().await;
        info!(
            instance = %self.instance_id,
            stored_keys = snapshot.len(),
            "opening embedded session"
        );
        self.post_ok(
            "/connect",
            &serde_json::json!({ "credentials": serde_json::Value::Object(snapshot) }),
        )
        .await
    }

    async fn status(&self) -> Result<TransportStatus, TransportError> {
        let url = format!("{}/status", self.base);
        let resp = self.client.get(&url).send().await?;
        let envelope: RuntimeResponse<serde_json::Value> = resp.json().await?;
        let raw = envelope.into_data()?;
        let connected = raw.get("connected").and_then(serde_json::Value::as_bool) == Some(true);
        Ok(TransportStatus { connected, raw })
    }

    async fn pairing_artifact(&self) -> Result<PairingArtifact, TransportError> {
        let url = format!("{}/qr", self.base);
        let resp = self.client.get(&url).send().await?;
        let envelope: RuntimeResponse<ArtifactData> = resp.json().await?;
        let data = envelope.into_data()?;
        if data.code.is_none() && data.image.is_none() {
            return Err(TransportError::ArtifactNotAvailable);
        }
        Ok(PairingArtifact {
            code: data.code,
            image_base64: data.image,
        })
    }

    async fn send_text(&self, target: &str, body: &str) -> Result<SendReceipt, TransportError> {
        let data: SendData = self
            .post_data(
                "/send-text",
                &serde_json::json!({ "target": target, "body": body }),
            )
            .await?;
        debug!(instance = %self.instance_id, "text sent via embedded runtime");
        Ok(SendReceipt {
            provider_message_id: data.message_id,
        })
    }

    async fn send_image(
        &self,
        target: &str,
        image_url: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, TransportError> {
        let data: SendData = self
            .post_data(
                "/send-image",
                &serde_json::json!({ "target": target, "url": image_url, "caption": caption }),
            )
            .await?;
        Ok(SendReceipt {
            provider_message_id: data.message_id,
        })
    }

    async fn send_audio(
        &self,
        target: &str,
        audio_url: &str,
    ) -> Result<SendReceipt, TransportError> {
        let data: SendData = self
            .post_data(
                "/send-audio",
                &serde_json::json!({ "target": target, "url": audio_url }),
            )
            .await?;
        Ok(SendReceipt {
            provider_message_id: data.message_id,
        })
    }

    async fn send_document(
        &self,
        target: &str,
        document_url: &str,
        filename: Option<&str>,
    ) -> Result<SendReceipt, TransportError> {
        let data: SendData = self
            .post_data(
                "/send-document",
                &serde_json::json!({ "target": target, "url": document_url, "fileName": filename }),
            )
            .await?;
        Ok(SendReceipt {
            provider_message_id: data.message_id,
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.post_ok("/disconnect", &serde_json::json!({})).await
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.post_ok("/restart", &serde_json::json!({})).await
    }
}

/// Spawn the long-poll listener that forwards runtime events to the channel.
///
/// Credential updates are persisted here and never forwarded. The task exits
/// when the receiver is dropped and reconnects with exponential backoff on
/// feed errors.
fn spawn_event_listener(
    poll_url: String,
    instance_id: String,
    credentials: Arc<dyn CredentialStore>,
    tx: mpsc::Sender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff_ms = POLL_BACKOFF_START_MS;

        loop {
            match poll_events(&poll_url, &instance_id, &credentials, &tx).await {
                Ok(()) => {
                    debug!(instance = %instance_id, "embedded event stream closed");
                    break;
                }
                Err(e) => {
                    warn!(
                        instance = %instance_id,
                        error = %e,
                        backoff_ms,
                        "embedded event stream error, reconnecting"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(POLL_BACKOFF_MAX_MS);
                }
            }
        }
    })
}

/// Poll the runtime for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff.
async fn poll_events(
    poll_url: &str,
    instance_id: &str,
    credentials: &Arc<dyn CredentialStore>,
    tx: &mpsc::Sender<TransportEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let events: Vec<WireEvent> = match resp.json().await {
                    Ok(events) => events,
                    Err(e) => {
                        debug!(instance = %instance_id, error = %e, "unparseable event batch");
                        continue;
                    }
                };
                for event in events {
                    match convert_event(event, instance_id, credentials).await {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                // Receiver dropped: the instance is gone.
                                return Ok(());
                            }
                        }
                        None => continue,
                    }
                }
            }
            Ok(resp) => {
                debug!(instance = %instance_id, status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll window expired with nothing to report.
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Translate one wire event, persisting credential updates in place.
async fn convert_event(
    event: WireEvent,
    instance_id: &str,
    credentials: &Arc<dyn CredentialStore>,
) -> Option<TransportEvent> {
    match event {
        WireEvent::Qr { code, image } => Some(TransportEvent::PairingReady(PairingArtifact {
            code,
            image_base64: image,
        })),
        WireEvent::Open { user } => Some(TransportEvent::Open { user }),
        WireEvent::Close { reason, logged_out } => {
            let reason = if logged_out {
                CloseReason::LoggedOut
            } else {
                CloseReason::Lost(reason.unwrap_or_else(|| "connection lost".to_owned()))
            };
            Some(TransportEvent::Closed { reason })
        }
        WireEvent::Message { payload } => Some(TransportEvent::Message { raw: payload }),
        WireEvent::Creds { key, value } => {
            match base64::engine::general_purpose::STANDARD.decode(&value) {
                Ok(blob) => {
                    if let Err(e) = credentials.set(instance_id, &key, &blob).await {
                        warn!(instance = %instance_id, key = %key, error = %e, "failed to persist session credential");
                    }
                }
                Err(e) => {
                    warn!(instance = %instance_id, key = %key, error = %e, "undecodable session credential");
                }
            }
            None
        }
    }
}
