//! Error taxonomy surfaced at the registry boundary.
//!
//! Every external operation returns a typed result; nothing here terminates
//! the process. Persistence and webhook-delivery failures are logged and
//! swallowed inside the components that hit them because they must not
//! interrupt connection lifecycle.

use crate::transport::TransportError;

/// Errors returned by registry and instance operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No instance with the given id.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// An instance with the given id already exists.
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    /// The id is empty after sanitization.
    #[error("invalid instance id: {0:?}")]
    InvalidInstanceId(String),

    /// A connection attempt is already in flight on this instance.
    #[error("connection attempt already in progress")]
    Busy,

    /// Connect attempts are cooling down; retry after the hint elapses.
    #[error("connect throttled, retry in {retry_after_secs}s")]
    Throttled {
        /// Seconds until the cooldown window elapses.
        retry_after_secs: u64,
    },

    /// The instance is not connected; callers must connect first. Sends are
    /// never queued or retried on this error.
    #[error("not connected")]
    NotConnected,

    /// The send target is not valid for the network.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// No pairing artifact is currently available.
    #[error("pairing artifact not available")]
    ArtifactNotAvailable,

    /// The transport backend could not be reached.
    #[error("transport unreachable: {0}")]
    TransportUnreachable(String),

    /// No webhook with the given id on this instance.
    #[error("webhook not found: {0}")]
    WebhookNotFound(String),

    /// The webhook URL could not be parsed.
    #[error("invalid webhook url: {0}")]
    InvalidWebhookUrl(String),

    /// Credential store failure. Non-fatal: in-memory operation continues for
    /// the current process, at the risk of re-pairing after a restart.
    #[error("credential store failure: {0}")]
    CredentialStore(String),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => Self::NotConnected,
            TransportError::InvalidTarget(target) => Self::InvalidTarget(target),
            TransportError::ArtifactNotAvailable => Self::ArtifactNotAvailable,
            TransportError::Unreachable(detail) => Self::TransportUnreachable(detail),
            TransportError::Rejected(detail) => Self::TransportUnreachable(detail),
        }
    }
}
