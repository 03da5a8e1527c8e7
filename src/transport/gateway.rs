//! Remote-gateway adapter.
//!
//! The gateway service owns the protocol session; this adapter is a thin
//! HTTP client over its per-instance operations. There is no push channel:
//! inbound events are delivered by the gateway as HTTP callbacks and enter
//! through the registry's raw-event ingestion.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    PairingArtifact, SendReceipt, TransportAdapter, TransportError, TransportStatus,
};

/// HTTP connect timeout for gateway calls.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for gateway calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Binding of a local instance to a session hosted on the gateway.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayBinding {
    /// Instance id on the gateway side.
    pub remote_instance_id: String,
    /// Per-instance access token.
    pub token: String,
}

impl std::fmt::Debug for GatewayBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBinding")
            .field("remote_instance_id", &self.remote_instance_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Adapter for one instance hosted on the remote gateway.
pub struct GatewayTransport {
    client: reqwest::Client,
    base: String,
    client_token: Option<String>,
    country_code: Option<String>,
}

/// Send acknowledgement shape returned by the gateway.
#[derive(Deserialize)]
struct GatewaySendReply {
    #[serde(rename = "messageId")]
    message_id: Option<String>,
    #[serde(rename = "gatewayMessageId")]
    gateway_message_id: Option<String>,
    error: Option<String>,
}

impl GatewayTransport {
    /// Build an adapter for the given binding.
    pub fn new(
        base_url: String,
        binding: GatewayBinding,
        client_token: Option<String>,
        country_code: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });

        let base = format!(
            "{}/instances/{}/token/{}",
            base_url.trim_end_matches('/'),
            binding.remote_instance_id,
            binding.token
        );

        Self {
            client,
            base,
            client_token,
            country_code,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_headers(self.client.get(format!("{}{path}", self.base)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_headers(self.client.post(format!("{}{path}", self.base)))
    }

    fn with_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.client_token {
            Some(token) => builder.header("Client-Token", token),
            None => builder,
        }
    }

    async fn send_payload(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<SendReceipt, TransportError> {
        let resp = self.post(path).json(&body).send().await?;
        let reply: GatewaySendReply = resp.json().await?;
        if let Some(error) = reply.error {
            return Err(classify_gateway_error(error));
        }
        let provider_message_id = reply
            .message_id
            .or(reply.gateway_message_id)
            .unwrap_or_default();
        if provider_message_id.is_empty() {
            debug!("gateway acknowledged send without a message id");
        }
        Ok(SendReceipt {
            provider_message_id,
        })
    }
}

/// Map a gateway error string onto the transport taxonomy.
fn classify_gateway_error(error: String) -> TransportError {
    let lower = error.to_lowercase();
    if lower.contains("not connected") || lower.contains("disconnected") {
        TransportError::NotConnected
    } else if lower.contains("invalid phone") || lower.contains("invalid number") {
        TransportError::InvalidTarget(error)
    } else {
        TransportError::Rejected(error)
    }
}

/// Reduce a target to digits, prefixing the default country code when absent.
///
/// Rejects targets with no digits at all.
pub fn format_target(raw: &str, country_code: Option<&str>) -> Result<String, TransportError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(TransportError::InvalidTarget(raw.to_owned()));
    }
    match country_code {
        Some(cc) if !cc.is_empty() && !digits.starts_with(cc) => Ok(format!("{cc}{digits}")),
        _ => Ok(digits),
    }
}

#[async_trait]
impl TransportAdapter for GatewayTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // The gateway holds the session; opening is a reachability probe.
        self.status().await.map(|_| ())
    }

    async fn status(&self) -> Result<TransportStatus, TransportError> {
        let resp = self.get("/status").send().await?;
        let raw: serde_json::Value = resp.json().await?;
        let connected = raw.get("connected").and_then(serde_json::Value::as_bool) == Some(true);
        Ok(TransportStatus { connected, raw })
    }

    async fn pairing_artifact(&self) -> Result<PairingArtifact, TransportError> {
        // Prefer the rendered image; fall back to the raw code value.
        let resp = self.get("/qr-code/image").send().await?;
        if resp.status().is_success() {
            let bytes = resp.bytes().await?;
            if !bytes.is_empty() {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                return Ok(PairingArtifact {
                    code: None,
                    image_base64: Some(encoded),
                });
            }
        }

        let resp = self.get("/qr-code").send().await?;
        let raw: serde_json::Value = resp.json().await?;
        match raw.get("value").and_then(serde_json::Value::as_str) {
            Some(value) if !value.is_empty() => Ok(PairingArtifact {
                code: Some(value.to_owned()),
                image_base64: None,
            }),
            _ => Err(TransportError::ArtifactNotAvailable),
        }
    }

    async fn send_text(&self, target: &str, body: &str) -> Result<SendReceipt, TransportError> {
        let phone = format_target(target, self.country_code.as_deref())?;
        self.send_payload(
            "/send-text",
            serde_json::json!({ "phone": phone, "message": body }),
        )
        .await
    }

    async fn send_image(
        &self,
        target: &str,
        image_url: &str,
        caption: Option<&str>,
    ) -> Result<SendReceipt, TransportError> {
        let phone = format_target(target, self.country_code.as_deref())?;
        self.send_payload(
            "/send-image",
            serde_json::json!({
                "phone": phone,
                "image": image_url,
                "caption": caption.unwrap_or_default(),
            }),
        )
        .await
    }

    async fn send_audio(
        &self,
        target: &str,
        audio_url: &str,
    ) -> Result<SendReceipt, TransportError> {
        let phone = format_target(target, self.country_code.as_deref())?;
        self.send_payload(
            "/send-audio",
            serde_json::json!({ "phone": phone, "audio": audio_url }),
        )
        .await
    }

    async fn send_document(
        &self,
        target: &str,
        document_url: &str,
        filename: Option<&str>,
    ) -> Result<SendReceipt, TransportError> {
        let phone = format_target(target, self.country_code.as_deref())?;
        self.send_payload(
            "/send-document/url",
            serde_json::json!({
                "phone": phone,
                "document": document_url,
                "fileName": filename.unwrap_or("document"),
            }),
        )
        .await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.post("/disconnect").send().await?;
        Ok(())
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.post("/restart").send().await?;
        Ok(())
    }
}
