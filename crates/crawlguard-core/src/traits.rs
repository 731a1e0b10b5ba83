use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, StoreError};
use crate::models::Article;

/// Fetches a crawled article (title, url, text) for a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Article, AppError>> + Send;
}

/// Client for a shared, networked key-value store.
///
/// Atomicity comes entirely from the store's per-key operations; clients do
/// no locking of their own and never retry. A failed call may or may not
/// have been applied.
pub trait KeyValueStore: Send + Sync + Clone {
    /// Create `key` only if it does not exist. Returns `true` iff this call
    /// created it.
    fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns `true` if the key existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns `false` if the key does not exist.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Glob-style key enumeration (`*`, `?`, `[...]`, `\` escapes).
    ///
    /// This is a scan, not a point read: expensive and not a consistent
    /// snapshot. Keep it off hot paths.
    fn keys_matching(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<HashSet<String>, StoreError>> + Send;

    /// Returns `true` if the member was newly added.
    fn set_add(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn set_contains(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns `true` if the member was present.
    fn set_remove(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn set_size(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn set_members(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashSet<String>, StoreError>> + Send;

    /// Atomically add `by` to the integer at `key` (missing keys count as 0).
    fn increment(&self, key: &str, by: i64) -> impl Future<Output = Result<i64, StoreError>> + Send;
}

/// Escape glob metacharacters so `input` matches literally inside a
/// [`KeyValueStore::keys_matching`] pattern.
pub fn escape_glob(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
