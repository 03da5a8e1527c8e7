//! Tests for raw-event classification and field extraction.

use chrono::{TimeZone, Utc};
use serde_json::json;

use switchboard::normalizer::{normalize, normalize_at};
use switchboard::types::{Direction, MessageKind};

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000)
        .single()
        .expect("valid timestamp")
}

#[test]
fn bare_text_becomes_text_envelope() {
    let raw = json!({ "text": "hi", "phone": "5511999", "messageId": "m1" });
    let normalized = normalize("acc", &raw).expect("should normalize");
    assert_eq!(normalized.envelope.kind, MessageKind::Text);
    assert_eq!(normalized.envelope.body.as_deref(), Some("hi"));
    assert_eq!(normalized.envelope.direction, Direction::Inbound);
    assert!(!normalized.generated_id);
}

#[test]
fn text_object_form_resolves_message_field() {
    let raw = json!({ "text": { "message": "hello there" }, "phone": "1", "messageId": "m1" });
    let normalized = normalize("acc", &raw).expect("should normalize");
    assert_eq!(normalized.envelope.body.as_deref(), Some("hello there"));
}

#[test]
fn individual_suffix_is_stripped() {
    let raw = json!({ "text": "hi", "phone": "5511999@s.whatsapp.net", "messageId": "m1" });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.phone, "5511999");
    assert!(!envelope.is_group);
}

#[test]
fn group_suffix_sets_is_group() {
    let raw = json!({ "text": "hi", "phone": "1205@g.us", "messageId": "m1" });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.phone, "1205");
    assert!(envelope.is_group);
}

#[test]
fn delivery_receipt_is_dropped() {
    let raw = json!({ "ack": 3, "messageId": "m1", "phone": "5511999" });
    assert!(normalize("acc", &raw).is_none());

    let raw = json!({ "type": "delivery-receipt", "messageId": "m1" });
    assert!(normalize("acc", &raw).is_none());
}

#[test]
fn status_markers_are_dropped() {
    assert!(normalize("acc", &json!({ "status": "connected" })).is_none());
    assert!(normalize("acc", &json!({ "event": "status" })).is_none());
    assert!(normalize("acc", &json!({ "connection": "open" })).is_none());
}

#[test]
fn self_sent_echo_is_dropped() {
    let raw = json!({ "text": "me", "isFromMe": true, "phone": "1" });
    assert!(normalize("acc", &raw).is_none());

    let raw = json!({ "text": "me", "fromMe": true, "phone": "1" });
    assert!(normalize("acc", &raw).is_none());
}

#[test]
fn unrecognizable_content_is_dropped() {
    let raw = json!({ "phone": "5511999", "somethingElse": 1 });
    assert!(normalize("acc", &raw).is_none());
}

#[test]
fn text_wins_over_media_when_both_present() {
    let raw = json!({
        "text": "caption text",
        "image": { "imageUrl": "https://x/a.jpg" },
        "phone": "1",
        "messageId": "m1"
    });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.kind, MessageKind::Text);
}

#[test]
fn image_resolves_url_caption_and_default_mime() {
    let raw = json!({
        "image": { "imageUrl": "https://x/a.jpg", "caption": "look" },
        "phone": "1",
        "messageId": "m1"
    });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.kind, MessageKind::Image);
    assert_eq!(envelope.media_url.as_deref(), Some("https://x/a.jpg"));
    assert_eq!(envelope.body.as_deref(), Some("look"));
    assert_eq!(envelope.mime_type.as_deref(), Some("image/jpeg"));
}

#[test]
fn media_generic_url_alias_is_fallback() {
    let raw = json!({
        "audio": { "url": "https://x/a.ogg" },
        "phone": "1",
        "messageId": "m1"
    });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.kind, MessageKind::Audio);
    assert_eq!(envelope.media_url.as_deref(), Some("https://x/a.ogg"));
    assert_eq!(envelope.mime_type.as_deref(), Some("audio/ogg"));
}

#[test]
fn explicit_mime_type_wins_over_default() {
    let raw = json!({
        "document": { "documentUrl": "https://x/a.pdf", "mimeType": "application/pdf" },
        "phone": "1",
        "messageId": "m1"
    });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.mime_type.as_deref(), Some("application/pdf"));
}

#[test]
fn media_priority_follows_content_order() {
    let raw = json!({
        "video": { "videoUrl": "https://x/v.mp4" },
        "sticker": { "stickerUrl": "https://x/s.webp" },
        "phone": "1",
        "messageId": "m1"
    });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.kind, MessageKind::Video);
}

#[test]
fn sender_name_aliases_and_default() {
    let raw = json!({ "text": "hi", "phone": "1", "messageId": "m1", "pushName": "Ana" });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.sender_name, "Ana");

    let raw = json!({ "text": "hi", "phone": "1", "messageId": "m1" });
    let envelope = normalize("acc", &raw).expect("should normalize").envelope;
    assert_eq!(envelope.sender_name, "unknown");
}

#[test]
fn missing_message_id_generates_flagged_fallback() {
    let now = fixed_now();
    let raw = json!({ "text": "hi", "phone": "1" });
    let normalized = normalize_at("acc", &raw, now).expect("should normalize");
    assert!(normalized.generated_id);
    assert_eq!(
        normalized.envelope.message_id,
        format!("msg-{}", now.timestamp_millis())
    );
}

#[test]
fn timestamp_millis_and_rfc3339_are_parsed() {
    let now = fixed_now();

    let raw = json!({ "text": "hi", "phone": "1", "messageId": "m1", "momment": 1_600_000_000_000_i64 });
    let envelope = normalize_at("acc", &raw, now)
        .expect("should normalize")
        .envelope;
    assert_eq!(envelope.timestamp.timestamp_millis(), 1_600_000_000_000);

    let raw = json!({ "text": "hi", "phone": "1", "messageId": "m1", "timestamp": "2024-05-01T12:00:00Z" });
    let envelope = normalize_at("acc", &raw, now)
        .expect("should normalize")
        .envelope;
    assert_eq!(
        envelope.timestamp,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid date")
    );

    let raw = json!({ "text": "hi", "phone": "1", "messageId": "m1" });
    let envelope = normalize_at("acc", &raw, now)
        .expect("should normalize")
        .envelope;
    assert_eq!(envelope.timestamp, now);
}

#[test]
fn normalization_is_idempotent_for_provider_ids() {
    let now = fixed_now();
    let raw = json!({
        "text": "hi",
        "phone": "5511999@s.whatsapp.net",
        "messageId": "m1",
        "senderName": "Ana",
        "momment": 1_600_000_000_000_i64
    });
    let first = normalize_at("acc", &raw, now).expect("should normalize");
    let second = normalize_at("acc", &raw, now).expect("should normalize");
    assert_eq!(first.envelope, second.envelope);
    assert!(!first.generated_id);
}

#[test]
fn non_object_payload_is_dropped() {
    assert!(normalize("acc", &json!("just a string")).is_none());
    assert!(normalize("acc", &json!(null)).is_none());
}
