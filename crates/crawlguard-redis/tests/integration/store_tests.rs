use std::collections::HashSet;
use std::time::Duration;

use crawlguard_core::error::StoreError;
use crawlguard_core::traits::{KeyValueStore, escape_glob};
use futures::future::join_all;

use crate::common::setup_test_store;

#[tokio::test]
async fn create_if_absent_has_one_winner() {
    let (store, _container) = setup_test_store().await;

    let attempts = (0..32).map(|i| {
        let store = store.clone();
        async move {
            store
                .create_if_absent("claim:x", &format!("worker-{i}"), None)
                .await
                .unwrap()
        }
    });
    let winners = join_all(attempts).await.into_iter().filter(|won| *won).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn get_set_delete_exists() {
    let (store, _container) = setup_test_store().await;

    assert_eq!(store.get("k").await.unwrap(), None);
    store.set("k", "v1", None).await.unwrap();
    store.set("k", "v2", None).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    assert!(store.exists("k").await.unwrap());
    assert!(store.delete("k").await.unwrap());
    assert!(!store.delete("k").await.unwrap());
    assert!(!store.exists("k").await.unwrap());
}

#[tokio::test]
async fn ttl_expires_keys() {
    let (store, _container) = setup_test_store().await;

    assert!(
        store
            .create_if_absent("short", "v", Some(Duration::from_millis(200)))
            .await
            .unwrap()
    );
    store.set("later", "v", None).await.unwrap();
    assert!(store.expire("later", Duration::from_millis(200)).await.unwrap());
    assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!store.exists("short").await.unwrap());
    assert!(!store.exists("later").await.unwrap());
    assert!(store.create_if_absent("short", "v", None).await.unwrap());
}

#[tokio::test]
async fn scan_matches_escaped_prefix() {
    let (store, _container) = setup_test_store().await;

    for key in ["p:url:ns:a", "p:url:ns:b?x=1", "p:url:other:c", "p:url:ns*:d"] {
        store.set(key, "1", None).await.unwrap();
    }
    let pattern = format!("{}*", escape_glob("p:url:ns:"));
    let keys = store.keys_matching(&pattern).await.unwrap();
    assert_eq!(
        keys,
        HashSet::from(["p:url:ns:a".to_string(), "p:url:ns:b?x=1".to_string()])
    );
}

#[tokio::test]
async fn set_operations() {
    let (store, _container) = setup_test_store().await;

    assert!(store.set_add("s", "a").await.unwrap());
    assert!(!store.set_add("s", "a").await.unwrap());
    assert!(store.set_add("s", "b").await.unwrap());
    assert!(store.set_contains("s", "a").await.unwrap());
    assert_eq!(store.set_size("s").await.unwrap(), 2);
    assert_eq!(
        store.set_members("s").await.unwrap(),
        HashSet::from(["a".to_string(), "b".to_string()])
    );
    assert!(store.set_remove("s", "a").await.unwrap());
    assert!(!store.set_remove("s", "a").await.unwrap());
    assert_eq!(store.set_size("missing").await.unwrap(), 0);
}

#[tokio::test]
async fn increment_is_atomic() {
    let (store, _container) = setup_test_store().await;

    let bumps = (0..50).map(|_| {
        let store = store.clone();
        async move { store.increment("counter", 1).await.unwrap() }
    });
    join_all(bumps).await;
    assert_eq!(store.get("counter").await.unwrap().as_deref(), Some("50"));
}

#[tokio::test]
async fn wrong_type_is_a_command_error() {
    let (store, _container) = setup_test_store().await;

    store.set("plain", "v", None).await.unwrap();
    let err = store.set_add("plain", "m").await.unwrap_err();
    assert!(matches!(err, StoreError::Command { op: "SADD", .. }));
}
