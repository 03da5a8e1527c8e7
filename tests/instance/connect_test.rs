//! Tests for the connect guards: busy mutual exclusion and throttling.

use std::time::Duration;

use switchboard::error::Error;
use switchboard::registry::CreateOptions;
use switchboard::transport::{CloseReason, PairingArtifact, TransportEvent};
use switchboard::types::InstanceState;

use crate::common::test_context;

#[tokio::test]
async fn two_rapid_connects_yield_one_accepted_one_busy() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("dual", CreateOptions::default())
        .await
        .expect("create");

    let (first, second) = tokio::join!(ctx.registry.connect(&id), ctx.registry.connect(&id));
    let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
    let busy = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(Error::Busy)))
        .count();
    assert_eq!(accepted, 1, "exactly one attempt is admitted");
    assert_eq!(busy, 1, "the loser is rejected as busy");
}

#[tokio::test]
async fn connect_while_pairing_is_still_busy() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("pairing-busy", CreateOptions::default())
        .await
        .expect("create");
    ctx.registry.connect(&id).await.expect("first connect");

    let instance = ctx.registry.lookup(&id).await.expect("lookup");
    instance
        .apply_event(TransportEvent::PairingReady(PairingArtifact {
            code: Some("1234".to_owned()),
            image_base64: None,
        }))
        .await;

    assert!(matches!(
        ctx.registry.connect(&id).await,
        Err(Error::Busy)
    ));
}

#[tokio::test]
async fn throttle_hint_decreases_and_expires() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("throttled", CreateOptions::default())
        .await
        .expect("create");

    // Pause only once the pool is up: the database worker lives on an OS
    // thread the paused clock cannot see.
    tokio::time::pause();
    ctx.registry.connect(&id).await.expect("first connect");

    // A logout releases the busy flag without scheduling a reconnect, so the
    // next attempts hit the cooldown check alone.
    let instance = ctx.registry.lookup(&id).await.expect("lookup");
    instance
        .apply_event(TransportEvent::Closed {
            reason: CloseReason::LoggedOut,
        })
        .await;
    assert_eq!(instance.snapshot().await.state, InstanceState::LoggedOut);

    let first = ctx.registry.connect(&id).await;
    let Err(Error::Throttled {
        retry_after_secs: hint_one,
    }) = &first
    else {
        panic!("expected throttled, got {first:?}");
    };

    tokio::time::advance(Duration::from_secs(2)).await;

    let second = ctx.registry.connect(&id).await;
    let Err(Error::Throttled {
        retry_after_secs: hint_two,
    }) = &second
    else {
        panic!("expected throttled, got {second:?}");
    };

    assert!(hint_two < hint_one, "hint shrinks as the window elapses");

    // Rejected attempts must not have reset the clock: the original window
    // still expires on schedule.
    tokio::time::advance(Duration::from_secs(29)).await;
    ctx.registry
        .connect(&id)
        .await
        .expect("connect after cooldown");
}
