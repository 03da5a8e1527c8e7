//! Tests for outbound sends, bulk sends and their delivery records.

use std::sync::atomic::Ordering;
use std::time::Duration;

use switchboard::error::Error;
use switchboard::registry::CreateOptions;
use switchboard::transport::TransportEvent;
use switchboard::types::Direction;

use crate::common::test_context;

async fn connected_instance(ctx: &crate::common::TestContext, name: &str) -> String {
    let id = ctx
        .registry
        .create(name, CreateOptions::default())
        .await
        .expect("create");
    let instance = ctx.registry.lookup(&id).await.expect("lookup");
    instance
        .apply_event(TransportEvent::Open { user: None })
        .await;
    id
}

#[tokio::test]
async fn sends_reach_the_adapter_and_the_delivery_log() {
    let ctx = test_context().await;
    let id = connected_instance(&ctx, "out").await;

    let receipt = ctx
        .registry
        .send_text(&id, "+55 (11) 9999-0000", "hello")
        .await
        .expect("send text");
    assert_eq!(receipt.provider_message_id, "mock-1");

    ctx.registry
        .send_image(&id, "5511999", "https://x/a.jpg", Some("cap"))
        .await
        .expect("send image");
    ctx.registry
        .send_audio(&id, "5511999", "https://x/a.ogg")
        .await
        .expect("send audio");
    ctx.registry
        .send_document(&id, "5511999", "https://x/a.pdf", Some("a.pdf"))
        .await
        .expect("send document");

    let sent = ctx.factory.adapter(&id).sent.lock().await.clone();
    assert_eq!(sent.len(), 4);

    let records = ctx.registry.delivery_log().list(10).await;
    assert_eq!(records.len(), 4);
    assert!(records
        .iter()
        .all(|r| r.direction == Some(Direction::Outbound)));
    // Newest first; the text send came first and carries the digits-only key.
    let text_record = records.last().expect("text record");
    assert_eq!(text_record.kind, "text");
    assert_eq!(text_record.phone.as_deref(), Some("551199990000"));
    assert_eq!(text_record.destinations.len(), 1);
    assert!(text_record.destinations[0].ok);
}

#[tokio::test]
async fn failed_sends_are_recorded_and_surfaced() {
    let ctx = test_context().await;
    let id = connected_instance(&ctx, "failing").await;
    ctx.factory
        .adapter(&id)
        .fail_sends
        .store(true, Ordering::SeqCst);

    let result = ctx.registry.send_text(&id, "5511999", "hello").await;
    assert!(matches!(result, Err(Error::TransportUnreachable(_))));

    let records = ctx.registry.delivery_log().list(10).await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].destinations[0].ok);
}

#[tokio::test]
async fn bulk_send_reports_per_target_and_never_aborts() {
    let ctx = test_context().await;
    let id = connected_instance(&ctx, "bulk").await;
    let adapter = ctx.factory.adapter(&id);
    tokio::time::pause();

    let targets = vec![
        "5511111".to_owned(),
        "5522222".to_owned(),
        "5533333".to_owned(),
    ];

    // Fail the middle target only.
    adapter.fail_targets.lock().await.push("5522222".to_owned());

    let report = ctx
        .registry
        .send_bulk(&id, &targets, "promo")
        .await
        .expect("bulk send");

    assert_eq!(report.total, 3);
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);
    assert!(report.details[0].ok);
    assert!(!report.details[1].ok);
    assert!(report.details[2].ok);
}

#[tokio::test]
async fn bulk_send_paces_targets_with_the_configured_delay() {
    let ctx = test_context().await;
    let id = connected_instance(&ctx, "paced").await;
    tokio::time::pause();

    let targets = vec!["5511111".to_owned(), "5522222".to_owned()];
    let started = tokio::time::Instant::now();
    ctx.registry
        .send_bulk(&id, &targets, "promo")
        .await
        .expect("bulk send");
    let elapsed = started.elapsed();

    // One pause between two targets, none after the last.
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(4));
}
