use std::time::Duration;

use crawlguard_core::dedup::{DedupConfig, DeduplicationStore};
use crawlguard_core::fingerprint::ContentFingerprint;
use crawlguard_core::testutil::sample_article;
use crawlguard_core::validation::ContentIntegrityValidator;
use futures::future::join_all;

use crate::common::setup_test_store;

#[tokio::test]
async fn concurrent_claims_across_clients() {
    let (store, _container) = setup_test_store().await;
    let dedup = DeduplicationStore::new(store, DedupConfig::default());

    let claims = (0..16).map(|_| {
        let dedup = dedup.clone();
        async move {
            dedup
                .claim_url("crawler", "https://news.example/contended", None)
                .await
                .unwrap()
        }
    });
    let winners = join_all(claims).await.into_iter().filter(|won| *won).count();
    assert_eq!(winners, 1);
    assert_eq!(dedup.count_processed("crawler").await.unwrap(), 1);
}

#[tokio::test]
async fn list_unclaim_and_clear() {
    let (store, _container) = setup_test_store().await;
    let dedup = DeduplicationStore::new(store, DedupConfig::default().with_key_prefix("it"));

    for url in ["https://a.example/1", "https://a.example/2"] {
        dedup.claim_url("ns", url, None).await.unwrap();
    }
    dedup.claim_url("other", "https://a.example/3", None).await.unwrap();

    assert_eq!(dedup.count_processed("ns").await.unwrap(), 2);
    assert!(dedup.unclaim("ns", "https://a.example/1").await.unwrap());
    assert!(!dedup.is_processed("ns", "https://a.example/1").await.unwrap());

    assert_eq!(dedup.clear_namespace("ns").await.unwrap(), 1);
    assert_eq!(dedup.count_processed("other").await.unwrap(), 1);
}

#[tokio::test]
async fn validators_share_content_set() {
    let (store, _container) = setup_test_store().await;
    let dedup = DeduplicationStore::new(store, DedupConfig::default());
    let article = sample_article("https://a.example/story", "redis");

    let first = ContentIntegrityValidator::default()
        .validate_with_store(&article.title, &article.url, &article.text, &dedup)
        .await
        .unwrap();
    assert!(first.is_valid());

    let second = ContentIntegrityValidator::default()
        .validate_with_store(&article.title, "https://b.example/copy", &article.text, &dedup)
        .await
        .unwrap();
    assert!(second.is_duplicate());
    assert_eq!(dedup.content_hash_count().await.unwrap(), 1);
}

#[tokio::test]
async fn reconcile_removes_expired_members() {
    let (store, _container) = setup_test_store().await;
    let dedup = DeduplicationStore::new(store, DedupConfig::default());
    let expiring = ContentFingerprint::of("expiring text");
    let kept = ContentFingerprint::of("kept text");

    dedup
        .add_content_hash(&expiring, None, Some(Duration::from_millis(200)))
        .await
        .unwrap();
    dedup.add_content_hash(&kept, None, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let report = dedup.reconcile().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.removed, 1);
    assert!(!dedup.is_duplicate_content(&expiring).await.unwrap());
    assert!(dedup.is_duplicate_content(&kept).await.unwrap());
}
