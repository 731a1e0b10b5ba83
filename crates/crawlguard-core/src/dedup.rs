//! Cross-process URL idempotency and content-hash deduplication.
//!
//! Key layout under the configured prefix:
//!
//! ```text
//! {prefix}:url:{namespace}:{url}       claim / processed marker
//! {prefix}:content:hashes              set of content fingerprints
//! {prefix}:content:meta:{fingerprint}  side-car metadata, carries the member's expiry
//! {prefix}:stats:{namespace}:{name}    atomic counters
//! ```
//!
//! The content set has no per-member TTL. Each member gets a side-car key
//! with its own expiry and [`DeduplicationStore::reconcile`] drops members
//! whose side-car is gone. That cleanup is eventually consistent: a member
//! stays a duplicate until the next sweep.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;

use crate::error::StoreError;
use crate::fingerprint::ContentFingerprint;
use crate::models::ContentHashMetadata;
use crate::traits::{KeyValueStore, escape_glob};

pub const DEFAULT_KEY_PREFIX: &str = "crawlguard";

/// Counter names used by the ingestion pipeline.
pub mod counters {
    pub const PROCESSED: &str = "processed";
    pub const REJECTED: &str = "rejected";
    pub const DUPLICATES: &str = "duplicates";
}

/// Configuration for the distributed deduplication store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    /// Prefix isolating this deployment's keys in a shared store.
    pub key_prefix: String,
    /// TTL applied when a call does not pass one. `None` means no expiry.
    pub default_ttl: Option<Duration>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: None,
        }
    }
}

impl DedupConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }
}

/// Result of a [`DeduplicationStore::reconcile`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub removed: usize,
}

/// Deduplication state shared by every crawler process through a
/// [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct DeduplicationStore<S: KeyValueStore> {
    store: S,
    config: DedupConfig,
}

impl<S: KeyValueStore> DeduplicationStore<S> {
    pub fn new(store: S, config: DedupConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    fn ttl_or_default(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.config.default_ttl)
    }

    fn namespace_prefix(&self, namespace: &str) -> Result<String, StoreError> {
        if namespace.is_empty() || namespace.contains(':') {
            return Err(StoreError::InvalidKey(format!(
                "namespace must be non-empty and free of ':', got '{namespace}'"
            )));
        }
        Ok(format!("{}:url:{}:", self.config.key_prefix, namespace))
    }

    fn url_key(&self, namespace: &str, url: &str) -> Result<String, StoreError> {
        Ok(format!("{}{}", self.namespace_prefix(namespace)?, url))
    }

    fn namespace_pattern(&self, namespace: &str) -> Result<String, StoreError> {
        Ok(format!("{}*", escape_glob(&self.namespace_prefix(namespace)?)))
    }

    fn content_set_key(&self) -> String {
        format!("{}:content:hashes", self.config.key_prefix)
    }

    fn content_meta_prefix(&self) -> String {
        format!("{}:content:meta:", self.config.key_prefix)
    }

    fn content_meta_key(&self, fingerprint: &ContentFingerprint) -> String {
        format!("{}{}", self.content_meta_prefix(), fingerprint)
    }

    fn counter_key(&self, namespace: &str, name: &str) -> String {
        format!("{}:stats:{}:{}", self.config.key_prefix, namespace, name)
    }

    /// Atomically claim `url` for `namespace`. Returns `true` iff this caller
    /// is the first; concurrent claimers of the same key see exactly one winner.
    pub async fn claim_url(
        &self,
        namespace: &str,
        url: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let key = self.url_key(namespace, url)?;
        let claimed = self
            .store
            .create_if_absent(&key, &Utc::now().to_rfc3339(), self.ttl_or_default(ttl))
            .await?;
        tracing::debug!(%namespace, %url, claimed, "Claim URL");
        Ok(claimed)
    }

    /// Unconditionally (re)mark `url` as processed.
    pub async fn mark_processed(
        &self,
        namespace: &str,
        url: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let key = self.url_key(namespace, url)?;
        self.store
            .set(&key, &Utc::now().to_rfc3339(), self.ttl_or_default(ttl))
            .await?;
        tracing::debug!(%namespace, %url, "Marked URL processed");
        Ok(())
    }

    pub async fn is_processed(&self, namespace: &str, url: &str) -> Result<bool, StoreError> {
        let key = self.url_key(namespace, url)?;
        self.store.exists(&key).await
    }

    /// Release a claim, e.g. to roll back after downstream processing failed.
    pub async fn unclaim(&self, namespace: &str, url: &str) -> Result<bool, StoreError> {
        let key = self.url_key(namespace, url)?;
        let removed = self.store.delete(&key).await?;
        tracing::debug!(%namespace, %url, removed, "Unclaimed URL");
        Ok(removed)
    }

    /// All URLs claimed or processed in `namespace`. O(n) scan.
    pub async fn list_processed(&self, namespace: &str) -> Result<HashSet<String>, StoreError> {
        let prefix = self.namespace_prefix(namespace)?;
        let keys = self
            .store
            .keys_matching(&self.namespace_pattern(namespace)?)
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Number of URLs claimed or processed in `namespace`. O(n) scan.
    pub async fn count_processed(&self, namespace: &str) -> Result<usize, StoreError> {
        Ok(self.list_processed(namespace).await?.len())
    }

    /// Delete every claim in `namespace`. Returns how many keys were removed.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<usize, StoreError> {
        let keys = self
            .store
            .keys_matching(&self.namespace_pattern(namespace)?)
            .await?;
        let mut removed = 0;
        for key in keys {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        tracing::info!(%namespace, removed, "Cleared namespace");
        Ok(removed)
    }

    pub async fn is_duplicate_content(
        &self,
        fingerprint: &ContentFingerprint,
    ) -> Result<bool, StoreError> {
        self.store
            .set_contains(&self.content_set_key(), fingerprint.as_str())
            .await
    }

    /// Add a fingerprint to the shared content set. Returns `true` if it was
    /// not a member yet.
    ///
    /// The side-car metadata key is created before the set member, so a
    /// member visible to [`reconcile`](Self::reconcile) always has its
    /// side-car unless that expired. An existing side-car is left untouched.
    /// The side-car write is best-effort: its failure is logged, and the
    /// member will be dropped by the next reconcile.
    pub async fn add_content_hash(
        &self,
        fingerprint: &ContentFingerprint,
        metadata: Option<&ContentHashMetadata>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let default_meta;
        let metadata = match metadata {
            Some(meta) => meta,
            None => {
                default_meta = ContentHashMetadata::default();
                &default_meta
            }
        };
        let meta_key = self.content_meta_key(fingerprint);
        let created = match serde_json::to_string(metadata) {
            Ok(json) => {
                self.store
                    .create_if_absent(&meta_key, &json, self.ttl_or_default(ttl))
                    .await
            }
            Err(e) => Err(StoreError::Serialization(e.to_string())),
        };
        let created = match created {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint.short(),
                    error = %e,
                    "Failed to write content hash metadata"
                );
                false
            }
        };

        match self
            .store
            .set_add(&self.content_set_key(), fingerprint.as_str())
            .await
        {
            Ok(added) => Ok(added),
            Err(e) => {
                if created && let Err(cleanup) = self.store.delete(&meta_key).await {
                    tracing::warn!(
                        fingerprint = %fingerprint.short(),
                        error = %cleanup,
                        "Failed to drop content hash metadata after failed add"
                    );
                }
                Err(e)
            }
        }
    }

    pub async fn content_metadata(
        &self,
        fingerprint: &ContentFingerprint,
    ) -> Result<Option<ContentHashMetadata>, StoreError> {
        match self.store.get(&self.content_meta_key(fingerprint)).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn remove_content_hash(
        &self,
        fingerprint: &ContentFingerprint,
    ) -> Result<bool, StoreError> {
        let removed = self
            .store
            .set_remove(&self.content_set_key(), fingerprint.as_str())
            .await?;
        self.store.delete(&self.content_meta_key(fingerprint)).await?;
        Ok(removed)
    }

    pub async fn content_hash_count(&self) -> Result<u64, StoreError> {
        self.store.set_size(&self.content_set_key()).await
    }

    /// Remove set members whose side-car metadata key has expired.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let set_key = self.content_set_key();
        let members = self.store.set_members(&set_key).await?;

        let meta_prefix = self.content_meta_prefix();
        let live: HashSet<String> = self
            .store
            .keys_matching(&format!("{}*", escape_glob(&meta_prefix)))
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&meta_prefix).map(str::to_string))
            .collect();

        let mut report = ReconcileReport {
            scanned: members.len(),
            removed: 0,
        };
        for member in members.difference(&live) {
            // The side-car may have been written since the scan.
            if self
                .store
                .exists(&format!("{meta_prefix}{member}"))
                .await?
            {
                continue;
            }
            if self.store.set_remove(&set_key, member).await? {
                report.removed += 1;
            }
        }

        tracing::info!(
            scanned = report.scanned,
            removed = report.removed,
            "Content hash reconciliation finished"
        );
        Ok(report)
    }

    pub async fn increment_counter(&self, namespace: &str, name: &str) -> Result<i64, StoreError> {
        self.store
            .increment(&self.counter_key(namespace, name), 1)
            .await
    }

    pub async fn counter(&self, namespace: &str, name: &str) -> Result<i64, StoreError> {
        match self.store.get(&self.counter_key(namespace, name)).await? {
            Some(raw) => raw.parse().map_err(|_| {
                StoreError::Serialization(format!("counter {name} holds non-integer '{raw}'"))
            }),
            None => Ok(0),
        }
    }
}
