//! Bounded in-process set of content fingerprints.
//!
//! The fast path for duplicate detection when the distributed store is
//! disabled or unreachable. The bound is enforced coarsely: once an insert
//! pushes the cache past `hard_cap` the whole set is dropped. Precision
//! degrades after each wipe, memory never exceeds `hard_cap` entries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::fingerprint::ContentFingerprint;

pub const DEFAULT_SOFT_CAP: usize = 10_000;
pub const DEFAULT_HARD_CAP: usize = 15_000;

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashSet<ContentFingerprint>,
    soft_cap_warned: bool,
    clears: u64,
}

/// Snapshot of cache counters for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCacheStats {
    pub size: usize,
    pub soft_cap: usize,
    pub hard_cap: usize,
    pub clears: u64,
}

/// Thread-safe local duplicate cache. Cloning shares the underlying set.
#[derive(Debug, Clone)]
pub struct LocalDuplicateCache {
    soft_cap: usize,
    hard_cap: usize,
    inner: Arc<Mutex<CacheInner>>,
}

impl Default for LocalDuplicateCache {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_CAP, DEFAULT_HARD_CAP)
    }
}

impl LocalDuplicateCache {
    pub fn new(soft_cap: usize, hard_cap: usize) -> Self {
        Self {
            soft_cap: soft_cap.min(hard_cap),
            hard_cap,
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned duplicate cache mutex");
            poisoned.into_inner()
        })
    }

    pub fn contains(&self, fingerprint: &ContentFingerprint) -> bool {
        self.lock_inner().entries.contains(fingerprint)
    }

    /// Record a fingerprint. Returns `true` if it was not present before,
    /// i.e. the caller is the first to submit this content.
    ///
    /// Check and insert happen under one lock, so of two concurrent callers
    /// with the same fingerprint exactly one sees `true`.
    pub fn insert(&self, fingerprint: ContentFingerprint) -> bool {
        let mut inner = self.lock_inner();
        if !inner.entries.insert(fingerprint) {
            return false;
        }

        let size = inner.entries.len();
        if size > self.hard_cap {
            tracing::warn!(
                size,
                hard_cap = self.hard_cap,
                "Duplicate cache exceeded hard cap, clearing all entries"
            );
            inner.entries.clear();
            inner.soft_cap_warned = false;
            inner.clears += 1;
        } else if size > self.soft_cap && !inner.soft_cap_warned {
            tracing::info!(
                size,
                soft_cap = self.soft_cap,
                hard_cap = self.hard_cap,
                "Duplicate cache above soft cap"
            );
            inner.soft_cap_warned = true;
        }
        true
    }

    /// Forget a fingerprint, e.g. when the article it was recorded for was
    /// never stored. Returns `true` if it was present.
    pub fn remove(&self, fingerprint: &ContentFingerprint) -> bool {
        self.lock_inner().entries.remove(fingerprint)
    }

    /// Approximate size; other threads may mutate right after the read.
    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.entries.clear();
        inner.soft_cap_warned = false;
    }

    pub fn stats(&self) -> DuplicateCacheStats {
        let inner = self.lock_inner();
        DuplicateCacheStats {
            size: inner.entries.len(),
            soft_cap: self.soft_cap,
            hard_cap: self.hard_cap,
            clears: inner.clears,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(i: usize) -> ContentFingerprint {
        ContentFingerprint::of(&format!("article body number {i}"))
    }

    #[test]
    fn first_insert_wins() {
        let cache = LocalDuplicateCache::default();
        assert!(cache.insert(fp(1)));
        assert!(!cache.insert(fp(1)));
        assert!(cache.contains(&fp(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removed_fingerprint_can_be_inserted_again() {
        let cache = LocalDuplicateCache::default();
        assert!(cache.insert(fp(7)));
        assert!(cache.remove(&fp(7)));
        assert!(!cache.remove(&fp(7)));
        assert!(cache.insert(fp(7)));
    }

    #[test]
    fn crossing_hard_cap_clears_everything() {
        let cache = LocalDuplicateCache::new(3, 5);
        for i in 0..5 {
            assert!(cache.insert(fp(i)));
        }
        assert_eq!(cache.len(), 5);

        // The sixth distinct entry takes the size past the hard cap.
        assert!(cache.insert(fp(5)));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().clears, 1);

        // Previously seen content is no longer detected after a wipe.
        assert!(cache.insert(fp(0)));
    }

    #[test]
    fn default_caps_reset_after_hard_cap() {
        let cache = LocalDuplicateCache::default();
        for i in 0..DEFAULT_HARD_CAP {
            cache.insert(fp(i));
        }
        assert_eq!(cache.len(), DEFAULT_HARD_CAP);
        cache.insert(fp(DEFAULT_HARD_CAP));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn duplicate_insert_never_triggers_clear() {
        let cache = LocalDuplicateCache::new(1, 2);
        cache.insert(fp(0));
        cache.insert(fp(1));
        assert!(!cache.insert(fp(1)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn soft_cap_is_clamped_to_hard_cap() {
        let cache = LocalDuplicateCache::new(100, 10);
        let stats = cache.stats();
        assert_eq!(stats.soft_cap, 10);
        assert_eq!(stats.hard_cap, 10);
    }

    #[test]
    fn concurrent_inserts_of_same_fingerprint_have_one_winner() {
        let cache = LocalDuplicateCache::default();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.insert(fp(42)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
