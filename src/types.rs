//! Core types shared across transports, instances and the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::PairingArtifact;

/// Content classification of a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image, optionally captioned.
    Image,
    /// Audio or voice note.
    Audio,
    /// Video, optionally captioned.
    Video,
    /// Arbitrary document attachment.
    Document,
    /// Sticker.
    Sticker,
}

impl MessageKind {
    /// Wire label of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }
}

/// Whether a message flowed into or out of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the network.
    Inbound,
    /// Sent by us.
    Outbound,
}

/// Webhook-subscribable event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A normalized inbound message.
    Message,
    /// A connection state transition.
    Status,
}

impl EventKind {
    /// Wire label of the event kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Status => "status",
        }
    }
}

/// Canonical, provider-agnostic message representation.
///
/// This is the only shape forwarded to subscribers; provider-specific
/// payloads stay inside the adapters and the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Owning instance id.
    pub instance_id: String,
    /// Provider message id, or a generated fallback (see [`crate::normalizer`]).
    pub message_id: String,
    /// Counterparty phone, digits only.
    pub phone: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Content classification.
    pub kind: MessageKind,
    /// Text body or media caption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Download URL for media kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// MIME type for media kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// Flow direction.
    pub direction: Direction,
    /// True when the conversation is a group chat.
    pub is_group: bool,
}

/// Account info reported by the transport once a session is linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUser {
    /// Provider account id.
    pub id: String,
    /// Display name, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Phone number of the linked account, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Connection lifecycle states of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// No session; the initial state.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// A pairing artifact was issued; waiting for a device link.
    PairingReady,
    /// Live session established.
    Connected,
    /// Authentication revoked by the provider; requires a forced reset.
    LoggedOut,
}

impl InstanceState {
    /// Wire label of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::PairingReady => "pairing_ready",
            Self::Connected => "connected",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// A subscriber endpoint registered on one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    /// Unique id within the instance; stable across restarts.
    pub id: String,
    /// Delivery URL.
    pub url: String,
    /// Event kinds this subscriber wants.
    pub events: Vec<EventKind>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Payload fanned out to `status`-subscribed webhooks on every transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// The state entered.
    pub status: InstanceState,
    /// Pairing artifact, present on pairing transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PairingArtifact>,
    /// Linked account, present once connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AccountUser>,
    /// Close reason, present on disconnect transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusEvent {
    /// A bare transition with no extra context.
    pub fn state(status: InstanceState) -> Self {
        Self {
            status,
            artifact: None,
            user: None,
            reason: None,
        }
    }
}
