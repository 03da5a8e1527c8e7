//! Tests for the bounded delivery log.

use switchboard::logring::{DeliveryRecord, DeliveryStatus, DestinationResult, LogRing};
use switchboard::types::MessageKind;

fn record(tag: &str) -> DeliveryRecord {
    DeliveryRecord::outbound_send("acc", tag, MessageKind::Text, true, None)
}

#[tokio::test]
async fn capacity_is_never_exceeded_and_oldest_evicts_first() {
    let ring = LogRing::new(3);
    for i in 0..4 {
        ring.push(record(&format!("{i}"))).await;
    }

    assert_eq!(ring.len().await, 3);
    let listed = ring.list(10).await;
    assert_eq!(listed.len(), 3);
    // Newest first; the oldest entry ("0") was evicted at the fourth push.
    assert_eq!(listed[0].phone.as_deref(), Some("3"));
    assert_eq!(listed[2].phone.as_deref(), Some("1"));
    assert!(listed.iter().all(|r| r.phone.as_deref() != Some("0")));
}

#[tokio::test]
async fn list_limit_and_clear() {
    let ring = LogRing::new(10);
    for i in 0..5 {
        ring.push(record(&format!("{i}"))).await;
    }

    let listed = ring.list(2).await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].phone.as_deref(), Some("4"));
    assert_eq!(listed[1].phone.as_deref(), Some("3"));

    ring.clear().await;
    assert!(ring.is_empty().await);
}

#[tokio::test]
async fn zero_capacity_ring_stays_empty() {
    let ring = LogRing::new(0);
    ring.push(record("1")).await;
    assert!(ring.is_empty().await);
}

#[test]
fn delivery_status_aggregates_destination_outcomes() {
    let ok = DestinationResult {
        target: "a".to_owned(),
        ok: true,
        detail: None,
    };
    let failed = DestinationResult {
        target: "b".to_owned(),
        ok: false,
        detail: Some("connection refused".to_owned()),
    };

    assert_eq!(
        DeliveryStatus::from_results(&[ok.clone(), ok.clone()]),
        DeliveryStatus::Delivered
    );
    assert_eq!(
        DeliveryStatus::from_results(&[ok, failed.clone()]),
        DeliveryStatus::Partial
    );
    assert_eq!(
        DeliveryStatus::from_results(&[failed]),
        DeliveryStatus::Failed
    );
}
