//! Tests for credential namespacing, wipe semantics and removal behavior.

use switchboard::credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
use switchboard::registry::CreateOptions;
use switchboard::store;

use crate::common::test_context;

async fn exercise_store(store: &dyn CredentialStore) {
    store.set("a", "creds", b"root").await.expect("set");
    store.set("a", "key-1", b"one").await.expect("set");
    store.set("b", "creds", b"other").await.expect("set");

    assert_eq!(
        store.get("a", "creds").await.expect("get").as_deref(),
        Some(b"root".as_slice())
    );
    assert_eq!(store.get("a", "missing").await.expect("get"), None);

    // Overwrite replaces in place.
    store.set("a", "creds", b"rotated").await.expect("set");
    assert_eq!(
        store.get("a", "creds").await.expect("get").as_deref(),
        Some(b"rotated".as_slice())
    );

    let mut namespace = store.load_namespace("a").await.expect("load");
    namespace.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(namespace.len(), 2);
    assert_eq!(namespace[0].0, "creds");
    assert_eq!(namespace[1].0, "key-1");

    // Wipe clears one namespace and leaves the other intact.
    store.wipe("a").await.expect("wipe");
    assert!(store.load_namespace("a").await.expect("load").is_empty());
    assert_eq!(
        store.get("b", "creds").await.expect("get").as_deref(),
        Some(b"other".as_slice())
    );
}

#[tokio::test]
async fn memory_store_namespaces_and_wipes() {
    let store = MemoryCredentialStore::new();
    exercise_store(&store).await;
}

#[tokio::test]
async fn sqlite_store_namespaces_and_wipes() {
    let pool = store::open_in_memory().await.expect("pool");
    let store = SqliteCredentialStore::new(pool);
    exercise_store(&store).await;
}

#[tokio::test]
async fn remove_with_wipe_leaves_no_residual_keys() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("wiped", CreateOptions::default())
        .await
        .expect("create");

    ctx.credentials.set(&id, "creds", b"root").await.expect("seed");
    ctx.credentials
        .set(&id, "key-1", b"one")
        .await
        .expect("seed");

    ctx.registry.remove(&id, true).await.expect("remove");
    assert!(
        ctx.credentials
            .load_namespace(&id)
            .await
            .expect("load")
            .is_empty(),
        "wipe removes every key in the namespace"
    );
}

#[tokio::test]
async fn remove_without_wipe_keeps_session_material() {
    let ctx = test_context().await;
    let id = ctx
        .registry
        .create("kept", CreateOptions::default())
        .await
        .expect("create");

    ctx.credentials.set(&id, "creds", b"root").await.expect("seed");

    ctx.registry.remove(&id, false).await.expect("remove");
    assert_eq!(
        ctx.credentials.load_namespace(&id).await.expect("load").len(),
        1,
        "session material survives removal without wipe"
    );
}
