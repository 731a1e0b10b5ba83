//! Ingestion pipeline: claim → fetch (with retry) → validate → mark.
//!
//! A claimed URL is released again when fetching or the store fails, so
//! another worker can pick it up. Rejected articles stay marked: re-fetching
//! them would only produce the same rejection.

use std::time::Duration;

use crate::dedup::{DeduplicationStore, counters};
use crate::error::AppError;
use crate::fingerprint::ContentFingerprint;
use crate::models::Article;
use crate::retry::{RetryExecutor, RetryOn};
use crate::traits::{Fetcher, KeyValueStore};
use crate::validation::{ContentIntegrityValidator, Field, ValidationResult};

/// Result of ingesting one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Another worker owns (or already finished) this URL.
    AlreadyClaimed,
    Accepted(Article),
    Rejected { reason: String, field: Field },
}

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum IngestEvent<'a> {
    Claimed {
        url: &'a str,
    },
    AlreadyClaimed {
        url: &'a str,
    },
    Fetched {
        url: &'a str,
        bytes: usize,
    },
    Accepted {
        url: &'a str,
    },
    Rejected {
        url: &'a str,
        field: Field,
        reason: &'a str,
    },
    Failed {
        url: &'a str,
        error: &'a AppError,
    },
    RolledBack {
        url: &'a str,
    },
}

/// Trait for receiving ingestion events (decoupled logging).
pub trait IngestReporter: Send + Sync {
    fn report(&self, event: IngestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingIngestReporter;

impl IngestReporter for TracingIngestReporter {
    fn report(&self, event: IngestEvent<'_>) {
        match event {
            IngestEvent::Claimed { url } => {
                tracing::debug!(%url, "URL claimed");
            }
            IngestEvent::AlreadyClaimed { url } => {
                tracing::debug!(%url, "URL already claimed, skipping");
            }
            IngestEvent::Fetched { url, bytes } => {
                tracing::debug!(%url, bytes, "Article fetched");
            }
            IngestEvent::Accepted { url } => {
                tracing::info!(%url, "Article accepted");
            }
            IngestEvent::Rejected { url, field, reason } => {
                tracing::info!(%url, %field, %reason, "Article rejected");
            }
            IngestEvent::Failed { url, error } => {
                tracing::warn!(%url, category = %error.category(), %error, "Ingestion failed");
            }
            IngestEvent::RolledBack { url } => {
                tracing::info!(%url, "Claim released");
            }
        }
    }
}

/// Orchestrates one crawler worker's ingestion of a URL.
///
/// Generic over the fetcher and the store so tests run against
/// [`MemoryStore`](crate::memory_store::MemoryStore) and a mock fetcher.
pub struct IngestService<F, S>
where
    F: Fetcher,
    S: KeyValueStore,
{
    fetcher: F,
    dedup: DeduplicationStore<S>,
    validator: ContentIntegrityValidator,
    executor: RetryExecutor,
    namespace: String,
    retry_on: RetryOn,
    claim_ttl: Option<Duration>,
}

impl<F, S> IngestService<F, S>
where
    F: Fetcher,
    S: KeyValueStore,
{
    /// Fetch failures are retried only when transient; see
    /// [`with_retry_on`](Self::with_retry_on).
    pub fn new(
        fetcher: F,
        dedup: DeduplicationStore<S>,
        validator: ContentIntegrityValidator,
        executor: RetryExecutor,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            dedup,
            validator,
            executor,
            namespace: namespace.into(),
            retry_on: RetryOn::Transient,
            claim_ttl: None,
        }
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = Some(ttl);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dedup(&self) -> &DeduplicationStore<S> {
        &self.dedup
    }

    pub fn validator(&self) -> &ContentIntegrityValidator {
        &self.validator
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Run the full pipeline for one URL.
    ///
    /// 1. Claim the URL; a lost claim ends the run.
    /// 2. Fetch through the retry executor.
    /// 3. Validate the article.
    /// 4. Mark the URL processed and bump the namespace counters.
    pub async fn ingest<R: IngestReporter>(
        &self,
        url: &str,
        reporter: &R,
    ) -> Result<IngestOutcome, AppError> {
        // 1. Claim
        if !self.dedup.claim_url(&self.namespace, url, self.claim_ttl).await? {
            reporter.report(IngestEvent::AlreadyClaimed { url });
            return Ok(IngestOutcome::AlreadyClaimed);
        }
        reporter.report(IngestEvent::Claimed { url });

        // 2. Fetch
        let operation = format!("fetch {url}");
        let article = match self
            .executor
            .execute_with_retry(&operation, &self.retry_on, || self.fetcher.fetch(url))
            .await
        {
            Ok(article) => article,
            Err(e) => return Err(self.fail(url, e, reporter).await),
        };
        reporter.report(IngestEvent::Fetched {
            url,
            bytes: article.text.len(),
        });

        // 3. Validate
        let verdict = if self.validator.config().distributed_dedup {
            match self
                .validator
                .validate_with_store(&article.title, &article.url, &article.text, &self.dedup)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => return Err(self.fail(url, e, reporter).await),
            }
        } else {
            self.validator.validate_article(&article)
        };

        // 4. Mark
        if let Err(e) = self
            .dedup
            .mark_processed(&self.namespace, url, self.claim_ttl)
            .await
        {
            if verdict.is_valid() {
                self.forget_content(&article.text).await;
            }
            return Err(self.fail(url, e.into(), reporter).await);
        }

        let duplicate = verdict.is_duplicate();
        match verdict {
            ValidationResult::Valid => {
                self.bump(counters::PROCESSED).await;
                reporter.report(IngestEvent::Accepted { url });
                Ok(IngestOutcome::Accepted(article))
            }
            ValidationResult::Invalid { reason, field } => {
                self.bump(counters::REJECTED).await;
                if duplicate {
                    self.bump(counters::DUPLICATES).await;
                }
                reporter.report(IngestEvent::Rejected {
                    url,
                    field,
                    reason: &reason,
                });
                Ok(IngestOutcome::Rejected { reason, field })
            }
        }
    }

    /// Report a failure and release the claim so the URL can be retried later.
    async fn fail<R: IngestReporter>(&self, url: &str, error: AppError, reporter: &R) -> AppError {
        reporter.report(IngestEvent::Failed { url, error: &error });
        match self.dedup.unclaim(&self.namespace, url).await {
            Ok(_) => reporter.report(IngestEvent::RolledBack { url }),
            Err(e) => {
                tracing::warn!(%url, error = %e, "Failed to release claim after failure");
            }
        }
        error
    }

    /// Drop the fingerprint validation recorded for an article that was never
    /// marked, so a retry of the URL is not its own duplicate.
    async fn forget_content(&self, text: &str) {
        let config = self.validator.config();
        if !config.enabled {
            return;
        }
        let fingerprint = ContentFingerprint::of(text);
        self.validator.duplicate_cache().remove(&fingerprint);
        if config.distributed_dedup
            && let Err(e) = self.dedup.remove_content_hash(&fingerprint).await
        {
            tracing::warn!(
                fingerprint = %fingerprint.short(),
                error = %e,
                "Failed to release content fingerprint"
            );
        }
    }

    /// Counters are advisory; a failed increment never fails ingestion.
    async fn bump(&self, name: &str) {
        if let Err(e) = self.dedup.increment_counter(&self.namespace, name).await {
            tracing::warn!(namespace = %self.namespace, counter = name, error = %e, "Failed to bump counter");
        }
    }
}
