//! Tests for instance-metadata and webhook persistence.

use chrono::Utc;

use switchboard::store::{self, InstanceRecord, MetaStore};
use switchboard::transport::{GatewayBinding, TransportFamily};
use switchboard::types::{EventKind, Webhook};

async fn meta() -> MetaStore {
    let pool = store::open_in_memory().await.expect("pool");
    MetaStore::new(pool)
}

fn webhook(id: &str) -> Webhook {
    Webhook {
        id: id.to_owned(),
        url: format!("https://example.com/{id}"),
        events: vec![EventKind::Message, EventKind::Status],
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn instance_records_roundtrip_including_gateway_binding() {
    let meta = meta().await;

    meta.save_instance(&InstanceRecord::new(
        "embedded-1".to_owned(),
        TransportFamily::Embedded,
        None,
    ))
    .await
    .expect("save");
    meta.save_instance(&InstanceRecord::new(
        "gateway-1".to_owned(),
        TransportFamily::Gateway,
        Some(GatewayBinding {
            remote_instance_id: "remote-9".to_owned(),
            token: "secret".to_owned(),
        }),
    ))
    .await
    .expect("save");

    let records = meta.list_instances().await.expect("list");
    assert_eq!(records.len(), 2);

    let embedded = records
        .iter()
        .find(|r| r.id == "embedded-1")
        .expect("embedded record");
    assert_eq!(embedded.family, TransportFamily::Embedded);
    assert!(embedded.gateway.is_none());

    let gateway = records
        .iter()
        .find(|r| r.id == "gateway-1")
        .expect("gateway record");
    assert_eq!(gateway.family, TransportFamily::Gateway);
    let binding = gateway.gateway.as_ref().expect("binding");
    assert_eq!(binding.remote_instance_id, "remote-9");
    assert_eq!(binding.token, "secret");
}

#[tokio::test]
async fn deleting_an_instance_cascades_to_its_webhooks() {
    let meta = meta().await;
    meta.save_instance(&InstanceRecord::new(
        "doomed".to_owned(),
        TransportFamily::Embedded,
        None,
    ))
    .await
    .expect("save");
    meta.save_webhook("doomed", &webhook("w1")).await.expect("save");
    meta.save_webhook("doomed", &webhook("w2")).await.expect("save");

    meta.delete_instance("doomed").await.expect("delete");

    assert!(meta.list_instances().await.expect("list").is_empty());
    assert!(meta.webhooks_for("doomed").await.expect("webhooks").is_empty());
}

#[tokio::test]
async fn webhook_roundtrip_preserves_filter_and_id() {
    let meta = meta().await;
    let original = webhook("w1");
    meta.save_webhook("acc", &original).await.expect("save");

    let loaded = meta.webhooks_for("acc").await.expect("webhooks");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "w1");
    assert_eq!(loaded[0].events, vec![EventKind::Message, EventKind::Status]);

    assert!(meta.delete_webhook("acc", "w1").await.expect("delete"));
    assert!(!meta.delete_webhook("acc", "w1").await.expect("delete again"));
}

#[tokio::test]
async fn gateway_binding_debug_never_prints_the_token() {
    let binding = GatewayBinding {
        remote_instance_id: "remote-9".to_owned(),
        token: "very-secret-token".to_owned(),
    };
    let debugged = format!("{binding:?}");
    assert!(!debugged.contains("very-secret-token"));
    assert!(debugged.contains("REDACTED"));
}
