pub mod circuit_breaker;
pub mod config;
pub mod dedup;
pub mod dedup_cache;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod memory_store;
pub mod models;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod traits;
pub mod validation;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use dedup::{DedupConfig, DeduplicationStore, ReconcileReport};
pub use dedup_cache::{DuplicateCacheStats, LocalDuplicateCache};
pub use error::{AppError, ErrorCategory, StoreError};
pub use fingerprint::{ContentFingerprint, compute_hash, normalize_text};
pub use ingest::{IngestEvent, IngestOutcome, IngestReporter, IngestService, TracingIngestReporter};
pub use memory_store::MemoryStore;
pub use models::{Article, ContentHashMetadata};
pub use retry::{RetryExecutor, RetryOn, RetryPolicy};
pub use traits::{Fetcher, KeyValueStore};
pub use validation::{ContentIntegrityValidator, Field, ValidationConfig, ValidationResult};
