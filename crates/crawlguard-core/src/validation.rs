//! Content-quality gate applied to every candidate article before persistence.
//!
//! Stages run in a fixed order and the first failure decides the result:
//!
//! 1. required fields (title, url, text; url must be http/https)
//! 2. trimmed text length within `[min_content_length, max_content_length]`
//! 3. quality heuristics: HTML ratio, script/style blocks, word count,
//!    repetitive sentences
//! 4. duplicate content, by normalized fingerprint
//!
//! The duplicate stage records the fingerprint when it passes, so the first
//! submission of a text is accepted and every later one is rejected.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::dedup::DeduplicationStore;
use crate::dedup_cache::{DEFAULT_HARD_CAP, DEFAULT_SOFT_CAP, LocalDuplicateCache};
use crate::error::{AppError, StoreError};
use crate::fingerprint::ContentFingerprint;
use crate::models::{Article, ContentHashMetadata};
use crate::traits::KeyValueStore;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("valid script/style regex")
});

/// Sentences at or below this many characters are ignored by the
/// repetition check.
const MIN_REPEATED_SENTENCE_CHARS: usize = 10;

const DUPLICATE_REASON: &str = "Duplicate content";

/// Configuration for the quality gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Master switch; when off every article is accepted unchecked.
    pub enabled: bool,
    pub min_content_length: usize,
    pub max_content_length: usize,
    pub max_html_ratio: f64,
    pub min_word_count: usize,
    pub max_repetition_ratio: f64,
    pub duplicate_cache_soft_cap: usize,
    pub duplicate_cache_hard_cap: usize,
    /// Use the distributed content set for the duplicate stage.
    pub distributed_dedup: bool,
    /// On store failure, fall back to the local cache instead of failing.
    pub fallback_to_local: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_content_length: 100,
            max_content_length: 1_000_000,
            max_html_ratio: 0.3,
            min_word_count: 10,
            max_repetition_ratio: 0.2,
            duplicate_cache_soft_cap: DEFAULT_SOFT_CAP,
            duplicate_cache_hard_cap: DEFAULT_HARD_CAP,
            distributed_dedup: false,
            fallback_to_local: true,
        }
    }
}

/// Article field a rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Url,
    Text,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Url => "url",
            Field::Text => "text",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid { reason: String, field: Field },
}

impl ValidationResult {
    fn invalid(field: Field, reason: impl Into<String>) -> Self {
        ValidationResult::Invalid {
            reason: reason.into(),
            field,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid { reason, .. } => Some(reason),
        }
    }

    /// True when the article was rejected by the duplicate-content stage.
    pub fn is_duplicate(&self) -> bool {
        self.reason()
            .is_some_and(|reason| reason.starts_with(DUPLICATE_REASON))
    }

    /// Error-returning form, for callers that prefer `?`.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { reason, field } => {
                Err(AppError::validation(reason, field.as_str()))
            }
        }
    }
}

fn duplicate(fingerprint: &ContentFingerprint) -> ValidationResult {
    ValidationResult::invalid(
        Field::Text,
        format!("{DUPLICATE_REASON} (fingerprint {})", fingerprint.short()),
    )
}

/// The quality gate. Cloning shares the local duplicate cache.
#[derive(Debug, Clone)]
pub struct ContentIntegrityValidator {
    config: ValidationConfig,
    cache: LocalDuplicateCache,
}

impl Default for ContentIntegrityValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl ContentIntegrityValidator {
    pub fn new(config: ValidationConfig) -> Self {
        let cache = LocalDuplicateCache::new(
            config.duplicate_cache_soft_cap,
            config.duplicate_cache_hard_cap,
        );
        Self { config, cache }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn duplicate_cache(&self) -> &LocalDuplicateCache {
        &self.cache
    }

    pub fn clear_duplicate_cache(&self) {
        self.cache.clear();
    }

    /// Run every stage, using the local cache for duplicate detection.
    pub fn validate(&self, title: &str, url: &str, text: &str) -> ValidationResult {
        if !self.config.enabled {
            return ValidationResult::Valid;
        }
        if let Some(rejection) = self.check_quality(title, url, text) {
            return self.log_rejection(url, rejection);
        }
        let result = self.check_local_duplicate(ContentFingerprint::of(text));
        self.log_rejection(url, result)
    }

    pub fn validate_article(&self, article: &Article) -> ValidationResult {
        self.validate(&article.title, &article.url, &article.text)
    }

    /// [`validate`](Self::validate) surfacing rejections as
    /// [`AppError::Validation`].
    pub fn validate_or_err(&self, title: &str, url: &str, text: &str) -> Result<(), AppError> {
        self.validate(title, url, text).into_result()
    }

    /// Run every stage, using the distributed content set for duplicate
    /// detection.
    ///
    /// A store failure is not a duplicate verdict: it either falls back to the
    /// local cache (`fallback_to_local`) or comes back as `AppError::Store`.
    pub async fn validate_with_store<S: KeyValueStore>(
        &self,
        title: &str,
        url: &str,
        text: &str,
        dedup: &DeduplicationStore<S>,
    ) -> Result<ValidationResult, AppError> {
        if !self.config.enabled {
            return Ok(ValidationResult::Valid);
        }
        if let Some(rejection) = self.check_quality(title, url, text) {
            return Ok(self.log_rejection(url, rejection));
        }

        let fingerprint = ContentFingerprint::of(text);
        let result = match self.check_distributed_duplicate(&fingerprint, url, dedup).await {
            Ok(result) => result,
            Err(e) if self.config.fallback_to_local => {
                tracing::warn!(
                    %url,
                    error = %e,
                    "Distributed duplicate check failed, falling back to local cache"
                );
                self.check_local_duplicate(fingerprint)
            }
            Err(e) => return Err(AppError::Store(e)),
        };
        Ok(self.log_rejection(url, result))
    }

    /// Stages 1-3. `None` means the article passed.
    fn check_quality(&self, title: &str, url: &str, text: &str) -> Option<ValidationResult> {
        check_required(title, url, text)
            .or_else(|| self.check_length(text))
            .or_else(|| self.check_html_ratio(text))
            .or_else(|| check_script_or_style(text))
            .or_else(|| self.check_word_count(text))
            .or_else(|| self.check_repetition(text))
    }

    fn check_length(&self, text: &str) -> Option<ValidationResult> {
        let length = text.trim().chars().count();
        if length < self.config.min_content_length {
            return Some(ValidationResult::invalid(
                Field::Text,
                format!(
                    "Content too short: {length} characters (minimum {})",
                    self.config.min_content_length
                ),
            ));
        }
        if length > self.config.max_content_length {
            return Some(ValidationResult::invalid(
                Field::Text,
                format!(
                    "Content too long: {length} characters (maximum {})",
                    self.config.max_content_length
                ),
            ));
        }
        None
    }

    fn check_html_ratio(&self, text: &str) -> Option<ValidationResult> {
        let ratio = html_ratio(text);
        (ratio > self.config.max_html_ratio).then(|| {
            ValidationResult::invalid(
                Field::Text,
                format!(
                    "Too much HTML markup ({:.0}% of content), poor extraction",
                    ratio * 100.0
                ),
            )
        })
    }

    fn check_word_count(&self, text: &str) -> Option<ValidationResult> {
        let words = word_count(text);
        (words < self.config.min_word_count).then(|| {
            ValidationResult::invalid(
                Field::Text,
                format!(
                    "Too few words: {words} (minimum {})",
                    self.config.min_word_count
                ),
            )
        })
    }

    fn check_repetition(&self, text: &str) -> Option<ValidationResult> {
        let ratio = repetition_ratio(text);
        (ratio > self.config.max_repetition_ratio).then(|| {
            ValidationResult::invalid(
                Field::Text,
                format!(
                    "Too much repetitive content ({:.0}% duplicate sentences)",
                    ratio * 100.0
                ),
            )
        })
    }

    fn check_local_duplicate(&self, fingerprint: ContentFingerprint) -> ValidationResult {
        if self.cache.insert(fingerprint.clone()) {
            ValidationResult::Valid
        } else {
            duplicate(&fingerprint)
        }
    }

    async fn check_distributed_duplicate<S: KeyValueStore>(
        &self,
        fingerprint: &ContentFingerprint,
        url: &str,
        dedup: &DeduplicationStore<S>,
    ) -> Result<ValidationResult, StoreError> {
        if dedup.is_duplicate_content(fingerprint).await? {
            return Ok(duplicate(fingerprint));
        }
        let metadata = ContentHashMetadata::new(Some(url.trim().to_string()), None);
        if !dedup
            .add_content_hash(fingerprint, Some(&metadata), None)
            .await?
        {
            // Another process added the same content between our two calls.
            return Ok(duplicate(fingerprint));
        }
        self.cache.insert(fingerprint.clone());
        Ok(ValidationResult::Valid)
    }

    fn log_rejection(&self, url: &str, result: ValidationResult) -> ValidationResult {
        if let ValidationResult::Invalid { reason, field } = &result {
            tracing::info!(%url, %field, %reason, "Article rejected");
        }
        result
    }
}

fn check_required(title: &str, url: &str, text: &str) -> Option<ValidationResult> {
    if title.trim().is_empty() {
        return Some(ValidationResult::invalid(Field::Title, "Title is required"));
    }
    let url = url.trim();
    if url.is_empty() {
        return Some(ValidationResult::invalid(Field::Url, "URL is required"));
    }
    if !has_http_scheme(url) {
        return Some(ValidationResult::invalid(
            Field::Url,
            "URL must start with http:// or https://",
        ));
    }
    if text.trim().is_empty() {
        return Some(ValidationResult::invalid(Field::Text, "Text is required"));
    }
    None
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url
        .get(..8)
        .unwrap_or(url)
        .to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn check_script_or_style(text: &str) -> Option<ValidationResult> {
    SCRIPT_OR_STYLE.is_match(text).then(|| {
        ValidationResult::invalid(Field::Text, "Content contains script or style blocks")
    })
}

/// Share of characters that belong to `<tag>`-shaped substrings.
fn html_ratio(text: &str) -> f64 {
    let original = text.chars().count();
    if original == 0 {
        return 0.0;
    }
    let stripped = HTML_TAG.replace_all(text, "").chars().count();
    (original - stripped) as f64 / original as f64
}

fn word_count(text: &str) -> usize {
    HTML_TAG.replace_all(text, "").split_whitespace().count()
}

/// Repeated sentences (longer than 10 chars, compared trimmed and
/// lower-cased) over all non-empty sentences.
fn repetition_ratio(text: &str) -> f64 {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    let mut duplicates = 0usize;

    for sentence in text.split(['.', '!', '?']) {
        let normalized = sentence.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        total += 1;
        if normalized.chars().count() > MIN_REPEATED_SENTENCE_CHARS && !seen.insert(normalized) {
            duplicates += 1;
        }
    }

    if total == 0 {
        0.0
    } else {
        duplicates as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupConfig;
    use crate::memory_store::MemoryStore;
    use crate::testutil::{FailingStore, sample_article};

    fn assert_rejected(result: &ValidationResult, field: Field, reason_prefix: &str) {
        match result {
            ValidationResult::Invalid { reason, field: f } => {
                assert_eq!(*f, field, "unexpected field for reason '{reason}'");
                assert!(
                    reason.starts_with(reason_prefix),
                    "expected reason starting with '{reason_prefix}', got '{reason}'"
                );
            }
            ValidationResult::Valid => panic!("expected rejection '{reason_prefix}', got Valid"),
        }
    }

    fn valid_text(seed: &str) -> String {
        sample_article("https://news.example/a", seed).text
    }

    #[test]
    fn accepts_well_formed_article() {
        let validator = ContentIntegrityValidator::default();
        let article = sample_article("https://news.example/a", "inflation");
        assert_eq!(validator.validate_article(&article), ValidationResult::Valid);
    }

    #[test]
    fn rejects_missing_fields_in_order() {
        let v = ContentIntegrityValidator::default();
        assert_rejected(&v.validate("  ", "", ""), Field::Title, "Title is required");
        assert_rejected(&v.validate("T", " ", ""), Field::Url, "URL is required");
        assert_rejected(
            &v.validate("T", "https://x.example", "\n\t"),
            Field::Text,
            "Text is required",
        );
    }

    #[test]
    fn url_scheme_checked_before_later_stages() {
        let v = ContentIntegrityValidator::default();
        // Text is also far too short and full of markup; the scheme wins.
        let result = v.validate("T", "ftp://x", "<script>x</script>");
        assert_rejected(&result, Field::Url, "URL must start with http:// or https://");

        let result = v.validate("T", "ftp://x", &valid_text("scheme"));
        assert_rejected(&result, Field::Url, "URL must start with");
    }

    #[test]
    fn scheme_check_is_case_insensitive() {
        let v = ContentIntegrityValidator::default();
        assert!(v.validate("T", "HTTPS://news.example/a", &valid_text("case")).is_valid());
    }

    #[test]
    fn length_bounds_are_inclusive() {
        let config = ValidationConfig {
            min_content_length: 20,
            max_content_length: 60,
            min_word_count: 1,
            ..Default::default()
        };
        let v = ContentIntegrityValidator::new(config);

        let short = "a".repeat(19);
        assert_rejected(
            &v.validate("T", "https://x.example/1", &short),
            Field::Text,
            "Content too short: 19 characters (minimum 20)",
        );

        let at_min = format!("  {}  ", "b".repeat(20));
        assert!(v.validate("T", "https://x.example/2", &at_min).is_valid());

        let at_max = "c".repeat(60);
        assert!(v.validate("T", "https://x.example/3", &at_max).is_valid());

        let long = "d".repeat(61);
        assert_rejected(
            &v.validate("T", "https://x.example/4", &long),
            Field::Text,
            "Content too long: 61 characters (maximum 60)",
        );
    }

    #[test]
    fn markup_heavy_text_fails_html_ratio() {
        let v = ContentIntegrityValidator::default();
        let mut text = String::new();
        while text.len() < v.config().min_content_length {
            text.push_str("<div><p>hi</p></div>");
        }
        assert_rejected(
            &v.validate("T", "https://x.example", &text),
            Field::Text,
            "Too much HTML markup",
        );
    }

    #[test]
    fn script_block_rejected() {
        let v = ContentIntegrityValidator::default();
        let text = format!(
            "{} <SCRIPT type=\"text/javascript\">\nvar a = 1;\n</SCRIPT>",
            valid_text("script")
        );
        assert_rejected(
            &v.validate("T", "https://x.example", &text),
            Field::Text,
            "Content contains script or style blocks",
        );
    }

    #[test]
    fn style_block_rejected() {
        let v = ContentIntegrityValidator::default();
        let text = format!("{} <style>p {{ color: red }}</style>", valid_text("style"));
        assert_rejected(
            &v.validate("T", "https://x.example", &text),
            Field::Text,
            "Content contains script or style blocks",
        );
    }

    #[test]
    fn few_words_rejected() {
        let v = ContentIntegrityValidator::default();
        let text = format!("{} tail", "x".repeat(120));
        assert_rejected(
            &v.validate("T", "https://x.example", &text),
            Field::Text,
            "Too few words: 2 (minimum 10)",
        );
    }

    #[test]
    fn repetitive_sentences_rejected() {
        let v = ContentIntegrityValidator::default();
        let text = "Buy our amazing product today. ".repeat(6);
        assert_rejected(
            &v.validate("T", "https://x.example", &text),
            Field::Text,
            "Too much repetitive content",
        );
    }

    #[test]
    fn short_repeated_sentences_are_tolerated() {
        // "Yes." repeats but is too short to count.
        let text = format!("Yes. Yes. Yes. {}", valid_text("short-repeats"));
        assert!(repetition_ratio(&text) <= 0.2);
    }

    #[test]
    fn duplicate_text_rejected_regardless_of_url() {
        let v = ContentIntegrityValidator::default();
        let text = valid_text("dup");
        assert!(v.validate("A", "https://one.example/a", &text).is_valid());

        // Whitespace and case noise normalize to the same fingerprint.
        let noisy = format!("  {}  ", text.to_uppercase());
        assert_rejected(
            &v.validate("B", "https://two.example/b", &noisy),
            Field::Text,
            "Duplicate content",
        );

        assert!(v
            .validate("C", "https://three.example/c", &valid_text("different"))
            .is_valid());
    }

    #[test]
    fn rejected_articles_do_not_poison_cache() {
        let v = ContentIntegrityValidator::default();
        let text = valid_text("poison");
        assert!(!v.validate("T", "ftp://x", &text).is_valid());
        assert!(v.validate("T", "https://x.example", &text).is_valid());
    }

    #[test]
    fn disabled_validator_accepts_everything() {
        let v = ContentIntegrityValidator::new(ValidationConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(v.validate("", "ftp://x", "").is_valid());
        assert!(v.validate("", "ftp://x", "").is_valid());
        assert!(v.duplicate_cache().is_empty());
    }

    #[test]
    fn validate_or_err_surfaces_typed_error() {
        let v = ContentIntegrityValidator::default();
        let err = v.validate_or_err("T", "ftp://x", "body").unwrap_err();
        match err {
            AppError::Validation { reason, field } => {
                assert_eq!(field, "url");
                assert_eq!(reason, "URL must start with http:// or https://");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn html_ratio_measures_tag_share() {
        assert_eq!(html_ratio("plain text"), 0.0);
        assert!((html_ratio("<b>ab</b>") - 7.0 / 9.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn distributed_duplicates_span_validators() {
        let dedup = DeduplicationStore::new(MemoryStore::new(), DedupConfig::default());
        let worker_a = ContentIntegrityValidator::default();
        let worker_b = ContentIntegrityValidator::default();
        let text = valid_text("shared");

        let first = worker_a
            .validate_with_store("T", "https://a.example", &text, &dedup)
            .await
            .unwrap();
        assert!(first.is_valid());

        let second = worker_b
            .validate_with_store("T", "https://b.example", &text, &dedup)
            .await
            .unwrap();
        assert_rejected(&second, Field::Text, "Duplicate content");

        let fp = ContentFingerprint::of(&text);
        let meta = dedup.content_metadata(&fp).await.unwrap().unwrap();
        assert_eq!(meta.url.as_deref(), Some("https://a.example"));
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_local_cache() {
        let dedup = DeduplicationStore::new(FailingStore::unavailable(), DedupConfig::default());
        let v = ContentIntegrityValidator::default();
        let text = valid_text("fallback");

        let first = v
            .validate_with_store("T", "https://a.example", &text, &dedup)
            .await
            .unwrap();
        assert!(first.is_valid());

        let second = v
            .validate_with_store("T", "https://b.example", &text, &dedup)
            .await
            .unwrap();
        assert_rejected(&second, Field::Text, "Duplicate content");
    }

    #[tokio::test]
    async fn store_failure_without_fallback_is_an_error() {
        let dedup = DeduplicationStore::new(FailingStore::unavailable(), DedupConfig::default());
        let v = ContentIntegrityValidator::new(ValidationConfig {
            fallback_to_local: false,
            ..Default::default()
        });

        let err = v
            .validate_with_store("T", "https://a.example", &valid_text("strict"), &dedup)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Connection(_))));
        assert!(v.duplicate_cache().is_empty());
    }

    #[tokio::test]
    async fn quality_rejection_skips_store() {
        let dedup = DeduplicationStore::new(FailingStore::unavailable(), DedupConfig::default());
        let v = ContentIntegrityValidator::new(ValidationConfig {
            fallback_to_local: false,
            ..Default::default()
        });
        let result = v
            .validate_with_store("T", "ftp://x", "body", &dedup)
            .await
            .unwrap();
        assert_rejected(&result, Field::Url, "URL must start with");
    }
}
