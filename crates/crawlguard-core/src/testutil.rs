//! Test utilities: handwritten fakes for the core traits.
//!
//! All fakes use `Arc<Mutex<_>>` for interior mutability so tests can script
//! responses and assert on recorded calls.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{AppError, StoreError};
use crate::ingest::{IngestEvent, IngestReporter};
use crate::memory_store::MemoryStore;
use crate::models::Article;
use crate::traits::{Fetcher, KeyValueStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Fetcher returning scripted responses in order, then a default article.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<VecDeque<Result<Article, AppError>>>>,
    calls: Arc<AtomicU32>,
}

impl MockFetcher {
    pub fn new(article: Article) -> Self {
        Self::with_responses(vec![Ok(article)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<Article, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Article, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut article)) => {
                article.url = url.to_string();
                Ok(article)
            }
            Some(Err(e)) => Err(e),
            None => Ok(sample_article(url, "default")),
        }
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// [`MemoryStore`] wrapper that fails selected commands with a connection
/// error. Command names follow Redis (`SET`, `SETNX`, `SADD`, ...); `*`
/// fails everything.
#[derive(Clone)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Arc<Mutex<HashSet<&'static str>>>,
}

impl FailingStore {
    /// A store that is entirely unreachable.
    pub fn unavailable() -> Self {
        Self::failing(&["*"])
    }

    pub fn failing(ops: &[&'static str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: Arc::new(Mutex::new(ops.iter().copied().collect())),
        }
    }

    /// Stop failing; the wrapped store keeps whatever was written.
    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        let failing = self.failing.lock().unwrap();
        if failing.contains("*") || failing.contains(op) {
            Err(StoreError::Connection(format!("{op}: connection refused")))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for FailingStore {
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.check("SETNX")?;
        self.inner.create_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check("GET")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check("SET")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check("DEL")?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check("EXISTS")?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check("PEXPIRE")?;
        self.inner.expire(key, ttl).await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<HashSet<String>, StoreError> {
        self.check("SCAN")?;
        self.inner.keys_matching(pattern).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check("SADD")?;
        self.inner.set_add(key, member).await
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check("SISMEMBER")?;
        self.inner.set_contains(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check("SREM")?;
        self.inner.set_remove(key, member).await
    }

    async fn set_size(&self, key: &str) -> Result<u64, StoreError> {
        self.check("SCARD")?;
        self.inner.set_size(key).await
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        self.check("SMEMBERS")?;
        self.inner.set_members(key).await
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        self.check("INCRBY")?;
        self.inner.increment(key, by).await
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Ingest reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<&'static str>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IngestReporter for MockReporter {
    fn report(&self, event: IngestEvent<'_>) {
        let label = match &event {
            IngestEvent::Claimed { .. } => "Claimed",
            IngestEvent::AlreadyClaimed { .. } => "AlreadyClaimed",
            IngestEvent::Fetched { .. } => "Fetched",
            IngestEvent::Accepted { .. } => "Accepted",
            IngestEvent::Rejected { .. } => "Rejected",
            IngestEvent::Failed { .. } => "Failed",
            IngestEvent::RolledBack { .. } => "RolledBack",
        };
        self.events.lock().unwrap().push(label);
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A well-formed article whose text passes every quality rule with the
/// default validation config. `seed` makes the text unique.
pub fn sample_article(url: &str, seed: &str) -> Article {
    let text = format!(
        "Central bank officials held interest rates steady on Tuesday, citing {seed} as a key factor. \
         Analysts had broadly expected the decision after a quarter of mixed economic data. \
         Markets reacted calmly, with bond yields moving only slightly in afternoon trading. \
         The next policy meeting is scheduled for early spring."
    );
    Article::new(format!("Rates held steady ({seed})"), url, text)
}
