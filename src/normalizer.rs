//! Normalization of raw provider events into canonical envelopes.
//!
//! The provider emits loosely-shaped JSON that differs per backend and per
//! event kind. Everything that is not a user message maps to `None`;
//! everything else maps to one [`MessageEnvelope`]. Each field is extracted
//! through an explicit, ordered alias list so the precedence is visible and
//! testable rather than buried in conditionals.
//!
//! Classification order, first match wins:
//! 1. known non-message callback kinds (receipts, presence, typing, acks)
//! 2. connection/status markers
//! 3. self-sent echoes
//! 4. payloads with no recognizable content field
//! 5. content, by priority: text > image > audio > video > document > sticker

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::trace;

use crate::types::{Direction, MessageEnvelope, MessageKind};

/// `type`/`event` values that are provider callbacks, never user messages.
const NON_MESSAGE_KINDS: &[&str] = &[
    "delivery-receipt",
    "read-receipt",
    "message-status",
    "presence",
    "typing",
];

/// Keys whose mere presence marks a delivery receipt.
const RECEIPT_KEYS: &[&str] = &["ack"];

/// Keys whose presence marks a connection/status callback.
const STATUS_MARKER_KEYS: &[&str] = &["status", "connection"];

/// Keys marking a self-sent echo when `true`.
const SELF_ECHO_KEYS: &[&str] = &["isFromMe", "fromMe"];

/// Ordered aliases for the counterparty address.
const PHONE_ALIASES: &[&str] = &["phone", "from", "chatId"];

/// Ordered aliases for the sender display name.
const SENDER_ALIASES: &[&str] = &["senderName", "pushName", "notifyName"];

/// Ordered aliases for the provider message id.
const MESSAGE_ID_ALIASES: &[&str] = &["messageId", "id"];

/// Ordered aliases for the message timestamp.
const TIMESTAMP_ALIASES: &[&str] = &["momment", "timestamp"];

/// Ordered aliases for the media MIME type inside a media object.
const MIME_ALIASES: &[&str] = &["mimeType", "mimetype"];

/// Addressing suffix for individual chats.
const INDIVIDUAL_SUFFIX: &str = "@s.whatsapp.net";

/// Legacy addressing suffix for individual chats.
const LEGACY_SUFFIX: &str = "@c.us";

/// Addressing suffix for group chats.
const GROUP_SUFFIX: &str = "@g.us";

/// One media extraction rule: content key, URL aliases in precedence order,
/// whether a caption applies, and the MIME fallback.
struct MediaRule {
    kind: MessageKind,
    key: &'static str,
    url_aliases: &'static [&'static str],
    caption: bool,
    default_mime: &'static str,
}

/// Media rules in classification priority order.
const MEDIA_RULES: &[MediaRule] = &[
    MediaRule {
        kind: MessageKind::Image,
        key: "image",
        url_aliases: &["imageUrl", "url"],
        caption: true,
        default_mime: "image/jpeg",
    },
    MediaRule {
        kind: MessageKind::Audio,
        key: "audio",
        url_aliases: &["audioUrl", "url"],
        caption: false,
        default_mime: "audio/ogg",
    },
    MediaRule {
        kind: MessageKind::Audio,
        key: "voice",
        url_aliases: &["voiceUrl", "audioUrl", "url"],
        caption: false,
        default_mime: "audio/ogg",
    },
    MediaRule {
        kind: MessageKind::Video,
        key: "video",
        url_aliases: &["videoUrl", "url"],
        caption: true,
        default_mime: "video/mp4",
    },
    MediaRule {
        kind: MessageKind::Document,
        key: "document",
        url_aliases: &["documentUrl", "url"],
        caption: false,
        default_mime: "application/octet-stream",
    },
    MediaRule {
        kind: MessageKind::Sticker,
        key: "sticker",
        url_aliases: &["stickerUrl", "url"],
        caption: false,
        default_mime: "image/webp",
    },
];

/// A successfully normalized event.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// The canonical envelope.
    pub envelope: MessageEnvelope,
    /// True when no provider id was present and `message_id` was generated.
    /// Generated ids are not stable across provider redelivery; dedup keyed
    /// on them is unreliable.
    pub generated_id: bool,
}

/// Normalize a raw provider event against the current wall clock.
///
/// Returns `None` for everything that is not a user message.
pub fn normalize(instance_id: &str, raw: &Value) -> Option<Normalized> {
    normalize_at(instance_id, raw, Utc::now())
}

/// Normalize with an explicit clock; `now` feeds the timestamp and
/// message-id fallbacks only.
pub fn normalize_at(instance_id: &str, raw: &Value, now: DateTime<Utc>) -> Option<Normalized> {
    let obj = raw.as_object()?;

    if is_non_message_callback(obj) {
        trace!(instance = instance_id, "dropping non-message callback");
        return None;
    }
    if is_status_marker(obj) {
        trace!(instance = instance_id, "dropping connection/status marker");
        return None;
    }
    if is_self_echo(obj) {
        trace!(instance = instance_id, "dropping self-sent echo");
        return None;
    }

    let content = classify_content(obj)?;
    let (phone, is_group) = extract_phone(obj);
    let (message_id, generated_id) = extract_message_id(obj, now);

    Some(Normalized {
        envelope: MessageEnvelope {
            instance_id: instance_id.to_owned(),
            message_id,
            phone,
            sender_name: first_string(obj, SENDER_ALIASES)
                .unwrap_or_else(|| "unknown".to_owned()),
            kind: content.kind,
            body: content.body,
            media_url: content.media_url,
            mime_type: content.mime_type,
            timestamp: extract_timestamp(obj, now),
            direction: Direction::Inbound,
            is_group,
        },
        generated_id,
    })
}

struct Content {
    kind: MessageKind,
    body: Option<String>,
    media_url: Option<String>,
    mime_type: Option<String>,
}

fn is_non_message_callback(obj: &Map<String, Value>) -> bool {
    if RECEIPT_KEYS.iter().any(|key| obj.contains_key(*key)) {
        return true;
    }
    ["type", "event"].iter().any(|key| {
        obj.get(*key)
            .and_then(Value::as_str)
            .is_some_and(|value| NON_MESSAGE_KINDS.contains(&value))
    })
}

fn is_status_marker(obj: &Map<String, Value>) -> bool {
    if STATUS_MARKER_KEYS.iter().any(|key| obj.contains_key(*key)) {
        return true;
    }
    obj.get("event").and_then(Value::as_str) == Some("status")
}

fn is_self_echo(obj: &Map<String, Value>) -> bool {
    SELF_ECHO_KEYS
        .iter()
        .any(|key| obj.get(*key).and_then(Value::as_bool) == Some(true))
}

/// Classify by content priority; `None` when nothing is recognizable.
fn classify_content(obj: &Map<String, Value>) -> Option<Content> {
    if let Some(body) = obj.get("text").and_then(text_body) {
        return Some(Content {
            kind: MessageKind::Text,
            body: Some(body),
            media_url: None,
            mime_type: None,
        });
    }

    for rule in MEDIA_RULES {
        let Some(media) = obj.get(rule.key) else {
            continue;
        };
        let media_url = first_string_value(media, rule.url_aliases);
        let body = if rule.caption {
            string_field(media, "caption").filter(|s| !s.is_empty())
        } else {
            None
        };
        let mime_type = first_string_value(media, MIME_ALIASES)
            .unwrap_or_else(|| rule.default_mime.to_owned());
        return Some(Content {
            kind: rule.kind,
            body,
            media_url,
            mime_type: Some(mime_type),
        });
    }

    None
}

/// Text arrives as a bare string or as an object carrying a `message` field.
fn text_body(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(inner) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}

/// Resolve the counterparty address: first alias wins, suffixes are
/// stripped, and the remainder is reduced to digits. The group suffix alone
/// decides `is_group`.
fn extract_phone(obj: &Map<String, Value>) -> (String, bool) {
    let raw = first_string(obj, PHONE_ALIASES).unwrap_or_default();
    let mut is_group = false;
    let mut rest = raw.as_str();

    if let Some(stripped) = rest.strip_suffix(GROUP_SUFFIX) {
        is_group = true;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_suffix(INDIVIDUAL_SUFFIX) {
        rest = stripped;
    } else if let Some(stripped) = rest.strip_suffix(LEGACY_SUFFIX) {
        rest = stripped;
    }

    let digits = rest.chars().filter(char::is_ascii_digit).collect();
    (digits, is_group)
}

fn extract_message_id(obj: &Map<String, Value>, now: DateTime<Utc>) -> (String, bool) {
    match first_string(obj, MESSAGE_ID_ALIASES) {
        Some(id) => (id, false),
        None => (format!("msg-{}", now.timestamp_millis()), true),
    }
}

fn extract_timestamp(obj: &Map<String, Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    for key in TIMESTAMP_ALIASES {
        match obj.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(parsed) = n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                {
                    return parsed;
                }
            }
            Some(Value::String(s)) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                    return parsed.with_timezone(&Utc);
                }
            }
            _ => {}
        }
    }
    now
}

/// First non-empty string among `aliases` in a JSON object.
fn first_string(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| {
        obj.get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    })
}

/// Like [`first_string`] against a value that may not be an object.
fn first_string_value(value: &Value, aliases: &[&str]) -> Option<String> {
    value.as_object().and_then(|obj| first_string(obj, aliases))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
