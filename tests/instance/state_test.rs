//! Tests for state transitions driven by transport push events.

use std::sync::atomic::Ordering;

use switchboard::error::Error;
use switchboard::registry::CreateOptions;
use switchboard::transport::{CloseReason, PairingArtifact, TransportEvent, TransportFamily};
use switchboard::types::{AccountUser, InstanceState};

use crate::common::test_context;

fn artifact() -> PairingArtifact {
    PairingArtifact {
        code: Some("pair-me".to_owned()),
        image_base64: None,
    }
}

fn user() -> AccountUser {
    AccountUser {
        id: "5511999@network".to_owned(),
        name: Some("Shop".to_owned()),
        phone: Some("5511999".to_owned()),
    }
}

#[tokio::test]
async fn pairing_event_stores_artifact_and_state() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("pair", CreateOptions::default())
        .await
        .expect("create");
    let instance = ctx.registry.lookup(&id).await.expect("lookup");

    instance
        .apply_event(TransportEvent::PairingReady(artifact()))
        .await;

    let snapshot = ctx.registry.status(&id).await.expect("status");
    assert_eq!(snapshot.state, InstanceState::PairingReady);
    assert!(!snapshot.connected);

    let stored = ctx.registry.pairing_artifact(&id).await.expect("artifact");
    assert_eq!(stored.code.as_deref(), Some("pair-me"));
}

#[tokio::test]
async fn open_event_connects_resets_counters_and_clears_artifact() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("opener", CreateOptions::default())
        .await
        .expect("create");
    let instance = ctx.registry.lookup(&id).await.expect("lookup");

    instance
        .apply_event(TransportEvent::PairingReady(artifact()))
        .await;
    instance
        .apply_event(TransportEvent::Open { user: Some(user()) })
        .await;

    let snapshot = ctx.registry.status(&id).await.expect("status");
    assert_eq!(snapshot.state, InstanceState::Connected);
    assert!(snapshot.connected);
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(
        snapshot.user.as_ref().map(|u| u.phone.as_deref()),
        Some(Some("5511999"))
    );

    // Artifact is gone; the mock adapter has none to serve either.
    assert!(matches!(
        ctx.registry.pairing_artifact(&id).await,
        Err(Error::ArtifactNotAvailable)
    ));
}

#[tokio::test]
async fn logout_close_parks_instance_without_retry() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("parked", CreateOptions::default())
        .await
        .expect("create");
    let instance = ctx.registry.lookup(&id).await.expect("lookup");

    instance
        .apply_event(TransportEvent::Open { user: None })
        .await;
    instance
        .apply_event(TransportEvent::Closed {
            reason: CloseReason::LoggedOut,
        })
        .await;

    let snapshot = ctx.registry.status(&id).await.expect("status");
    assert_eq!(snapshot.state, InstanceState::LoggedOut);
    assert_eq!(
        snapshot.reconnect_attempts, 0,
        "logout schedules no reconnect"
    );
}

#[tokio::test]
async fn lost_close_disconnects_and_schedules_retry() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("lossy", CreateOptions::default())
        .await
        .expect("create");
    let instance = ctx.registry.lookup(&id).await.expect("lookup");

    instance
        .apply_event(TransportEvent::Open { user: None })
        .await;
    instance
        .apply_event(TransportEvent::Closed {
            reason: CloseReason::Lost("stream error".to_owned()),
        })
        .await;

    let snapshot = ctx.registry.status(&id).await.expect("status");
    assert_eq!(snapshot.state, InstanceState::Disconnected);
    assert_eq!(snapshot.reconnect_attempts, 1);
    assert!(snapshot.user.is_none(), "user info cleared on close");
}

#[tokio::test]
async fn embedded_sends_fail_fast_until_connected() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("sender", CreateOptions::default())
        .await
        .expect("create");

    assert!(matches!(
        ctx.registry.send_text(&id, "5511999", "hello").await,
        Err(Error::NotConnected)
    ));

    let instance = ctx.registry.lookup(&id).await.expect("lookup");
    instance
        .apply_event(TransportEvent::Open { user: None })
        .await;

    let receipt = ctx
        .registry
        .send_text(&id, "5511999", "hello")
        .await
        .expect("send after open");
    assert_eq!(receipt.provider_message_id, "mock-1");
}

#[tokio::test]
async fn event_pump_drives_the_state_machine() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("pumped", CreateOptions::default())
        .await
        .expect("create");

    ctx.factory
        .events(&id)
        .send(TransportEvent::Open { user: None })
        .await
        .expect("push open event");

    // The pump task applies the event asynchronously.
    let instance = ctx.registry.lookup(&id).await.expect("lookup");
    for _ in 0..10_000 {
        if instance.snapshot().await.state == InstanceState::Connected {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(
        instance.snapshot().await.state,
        InstanceState::Connected,
        "pushed open event reaches the state machine"
    );
}

#[tokio::test]
async fn gateway_status_probes_the_adapter() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create(
            "gw",
            CreateOptions {
                family: TransportFamily::Gateway,
                gateway: Some(switchboard::transport::GatewayBinding {
                    remote_instance_id: "remote-1".to_owned(),
                    token: "secret".to_owned(),
                }),
            },
        )
        .await
        .expect("create");

    let snapshot = ctx.registry.status(&id).await.expect("status");
    assert_eq!(snapshot.state, InstanceState::Disconnected);

    ctx.factory.adapter(&id).connected.store(true, Ordering::SeqCst);
    let snapshot = ctx.registry.status(&id).await.expect("status");
    assert_eq!(snapshot.state, InstanceState::Connected);
    assert!(snapshot.connected);
}
