use std::sync::Arc;
use std::time::Duration;

use relay_provider_core::{
    CredentialHealth, CredentialPool, CredentialRef, CredentialStore, Event, EventHub,
    FileCredentialStore, MemoryCredentialStore, OperationalEvent,
};
use tokio::time::timeout;

#[tokio::test]
async fn invalidation_fires_once_under_concurrency() {
    let hub = EventHub::new(16);
    let mut rx = hub.subscribe();
    let pool = Arc::new(CredentialPool::new());
    let store = Arc::new(MemoryCredentialStore::new());
    store
        .seed("alpha", vec!["sk-first-key-0001".into(), "sk-second-key-0002".into()])
        .await;
    let health = CredentialHealth::new(pool.clone(), store.clone(), hub);
    assert_eq!(health.load_provider("alpha").await.unwrap(), 2);

    let cred = CredentialRef::new("alpha", "sk-first-key-0001");
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let health = health.clone();
        let cred = cred.clone();
        tasks.push(tokio::spawn(
            async move { health.invalidate(Some(&cred)).await },
        ));
    }
    let mut fired = 0;
    for task in tasks {
        if task.await.unwrap() {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);

    let ev = timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match ev {
        Event::Operational(OperationalEvent::CredentialInvalidated(ev)) => {
            assert_eq!(ev.provider, "alpha");
            assert_eq!(ev.credential_excerpt, "sk-first-k...");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx.try_recv().is_err());

    assert_eq!(store.invalid("alpha").await, vec!["sk-first-key-0001"]);
    assert_eq!(
        store.load("alpha").await.unwrap(),
        vec!["sk-second-key-0002"]
    );
    assert_eq!(pool.active_count("alpha").await, 1);
}

#[tokio::test]
async fn invalidate_none_is_noop() {
    let pool = Arc::new(CredentialPool::new());
    let store = Arc::new(MemoryCredentialStore::new());
    let health = CredentialHealth::new(pool, store, EventHub::new(4));
    assert!(!health.invalidate(None).await);
}

#[tokio::test]
async fn file_store_persists_invalidations_across_reload() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("beta.txt"), "k1\nk2\n\nk3\n")
        .await
        .unwrap();

    let store = Arc::new(FileCredentialStore::new(dir.path()));
    let pool = Arc::new(CredentialPool::new());
    let health = CredentialHealth::new(pool.clone(), store.clone(), EventHub::new(4));
    assert_eq!(health.load_provider("beta").await.unwrap(), 3);

    assert!(health.invalidate(Some(&CredentialRef::new("beta", "k2"))).await);

    let keys = tokio::fs::read_to_string(dir.path().join("beta.txt"))
        .await
        .unwrap();
    assert_eq!(keys, "k1\nk3\n");
    let invalid = tokio::fs::read_to_string(dir.path().join("beta.invalid.txt"))
        .await
        .unwrap();
    assert_eq!(invalid, "k2\n");

    // A fresh pool reading the same directory must not see the retired key.
    let fresh = Arc::new(CredentialPool::new());
    let reloaded = CredentialHealth::new(fresh.clone(), store, EventHub::new(4));
    assert_eq!(reloaded.load_provider("beta").await.unwrap(), 2);
}

#[tokio::test]
async fn file_store_rejects_path_like_provider_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCredentialStore::new(dir.path());
    assert!(store.load("../etc").await.is_err());
    assert!(store.load("missing").await.unwrap().is_empty());
}
