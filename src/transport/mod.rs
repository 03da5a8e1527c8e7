//! Transport abstraction over the two backend families.
//!
//! One [`TransportAdapter`] trait fronts both the embedded protocol runtime
//! ([`embedded`]) and the remote gateway service ([`gateway`]). The embedded
//! family additionally pushes [`TransportEvent`]s over a channel handed to
//! the owning instance at construction; the gateway family has no push
//! channel and relies on externally delivered callbacks ingested through the
//! registry.

pub mod embedded;
pub mod gateway;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::credentials::CredentialStore;
use crate::types::AccountUser;

pub use embedded::EmbeddedTransport;
pub use gateway::{GatewayBinding, GatewayTransport};

/// Backend family operating an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFamily {
    /// Local protocol runtime with a push-event channel.
    #[default]
    Embedded,
    /// Remote gateway service holding session state externally.
    Gateway,
}

impl TransportFamily {
    /// Stable label used in persistence and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Gateway => "gateway",
        }
    }

    /// Parse a persisted label.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "embedded" => Some(Self::Embedded),
            "gateway" => Some(Self::Gateway),
            _ => None,
        }
    }
}

/// Errors from transport implementations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No live session; the caller must connect first.
    #[error("not connected")]
    NotConnected,

    /// The send target is not routable on the network.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// No pairing artifact is available right now.
    #[error("pairing artifact not available")]
    ArtifactNotAvailable,

    /// The backend could not be reached at all.
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// The backend answered but refused the request.
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unreachable(e.to_string())
    }
}

/// Connection snapshot reported by a transport.
#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    /// Whether a live session is established.
    pub connected: bool,
    /// Raw provider-shaped status payload, kept for diagnostics only.
    pub raw: serde_json::Value,
}

/// One-time code/image used to link a new session to a physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingArtifact {
    /// Raw pairing code, when the provider exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// PNG rendering of the code, base64-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

impl PairingArtifact {
    /// Decode the PNG bytes for callers that serve the image directly.
    ///
    /// Accepts both bare base64 and `data:image/png;base64,` URLs.
    pub fn png_bytes(&self) -> Option<Vec<u8>> {
        use base64::Engine as _;

        let raw = self.image_base64.as_deref()?;
        let trimmed = raw.strip_prefix("data:image/png;base64,").unwrap_or(raw);
        base64::engine::general_purpose::STANDARD.decode(trimmed).ok()
    }
}

/// Provider acknowledgement for an outbound send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    /// Message id assigned by the provider.
    pub provider_message_id: String,
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Authentication was revoked; never auto-retried.
    LoggedOut,
    /// The session dropped for any other reason.
    Lost(String),
}

impl CloseReason {
    /// True when the close means revoked authentication.
    pub const fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    /// Human-readable reason for status notifications.
    pub fn describe(&self) -> String {
        match self {
            Self::LoggedOut => "logged out".to_owned(),
            Self::Lost(detail) => detail.clone(),
        }
    }
}

/// Push events emitted by the embedded family.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing artifact was issued; the session waits for a device link.
    PairingReady(PairingArtifact),
    /// Session established.
    Open {
        /// Linked account, when the runtime reports it.
        user: Option<AccountUser>,
    },
    /// Session closed.
    Closed {
        /// Why it closed; decides whether a reconnect is scheduled.
        reason: CloseReason,
    },
    /// Raw inbound provider payload, to be normalized by the instance.
    Message {
        /// Provider-shaped JSON event.
        raw: serde_json::Value,
    },
}

/// Everything the registry needs to run one instance's transport.
pub struct BuiltTransport {
    /// The adapter.
    pub adapter: Arc<dyn TransportAdapter>,
    /// Push-event stream, embedded family only.
    pub events: Option<mpsc::Receiver<TransportEvent>>,
}

/// Uniform capability set over both backend families.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Open (or re-open) the session. For the gateway family this is a cheap
    /// probe, since the gateway holds connection state externally.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Current connection snapshot.
    async fn status(&self) -> Result<TransportStatus, TransportError>;

    /// Fetch the current pairing artifact, if one is pending.
    async fn pairing_artifact(&self) -> Result<PairingArtifact, TransportError>;

    /// Send a text message.
    async fn send_text(&self, target: &str, body: &str) -> Result<SendReceipt, TransportError>;

    /// Send an image by URL with an optional caption.
    async fn send_image(
        &self,
        target: &str,
        image_url: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, TransportError>;

    /// Send an audio clip by URL.
    async fn send_audio(&self, target: &str, audio_url: &str)
        -> Result<SendReceipt, TransportError>;

    /// Send a document by URL with an optional file name.
    async fn send_document(
        &self,
        target: &str,
        document_url: &str,
        filename: Option<&str>,
    ) -> Result<SendReceipt, TransportError>;

    /// Tear the session down without wiping credentials.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Restart the session on the provider side.
    async fn restart(&self) -> Result<(), TransportError>;
}

/// Builds the transport stack for one instance; selects the family.
pub trait TransportFactory: Send + Sync {
    /// Build an adapter (and, for the embedded family, its push channel).
    fn build(
        &self,
        instance_id: &str,
        family: TransportFamily,
        gateway: Option<&GatewayBinding>,
    ) -> Result<BuiltTransport, TransportError>;
}

/// Production factory wiring both families from configuration.
pub struct DefaultTransportFactory {
    embedded_runtime_url: String,
    gateway_base_url: String,
    gateway_client_token: Option<String>,
    gateway_country_code: Option<String>,
    credentials: Arc<dyn CredentialStore>,
}

impl DefaultTransportFactory {
    /// Build a factory from the embedded/gateway sections of the config.
    pub fn new(
        config: &crate::config::Config,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            embedded_runtime_url: config.embedded.runtime_url.clone(),
            gateway_base_url: config.gateway.base_url.clone(),
            gateway_client_token: config.gateway.client_token.clone(),
            gateway_country_code: config.gateway.default_country_code.clone(),
            credentials,
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build(
        &self,
        instance_id: &str,
        family: TransportFamily,
        gateway: Option<&GatewayBinding>,
    ) -> Result<BuiltTransport, TransportError> {
        match family {
            TransportFamily::Embedded => {
                let (adapter, events) = EmbeddedTransport::start(
                    self.embedded_runtime_url.clone(),
                    instance_id.to_owned(),
                    Arc::clone(&self.credentials),
                );
                Ok(BuiltTransport {
                    adapter: Arc::new(adapter),
                    events: Some(events),
                })
            }
            TransportFamily::Gateway => {
                let binding = gateway.ok_or_else(|| {
                    TransportError::Rejected("gateway instance has no remote binding".to_owned())
                })?;
                let adapter = GatewayTransport::new(
                    self.gateway_base_url.clone(),
                    binding.clone(),
                    self.gateway_client_token.clone(),
                    self.gateway_country_code.clone(),
                );
                Ok(BuiltTransport {
                    adapter: Arc::new(adapter),
                    events: None,
                })
            }
        }
    }
}
