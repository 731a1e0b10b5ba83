//! Environment-driven configuration for the resilience layer.
//!
//! Every loader has a `from_env` form reading the process environment and a
//! `from_lookup` form taking any `key -> value` function, which is what the
//! tests use.

use std::str::FromStr;
use std::time::Duration;

use crate::dedup::DedupConfig;
use crate::error::AppError;
use crate::retry::RetryPolicy;
use crate::validation::ValidationConfig;

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T, L>(lookup: &L, key: &str, default: T, expected: &str) -> Result<T, AppError>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be {expected}"))
        }),
    }
}

fn bool_or<L>(lookup: &L, key: &str, default: bool) -> Result<bool, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be true or false"
            ))),
        },
    }
}

fn millis_or<L>(lookup: &L, key: &str, default: Duration) -> Result<Duration, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    let millis = parse_or(
        lookup,
        key,
        default.as_millis() as u64,
        "a non-negative integer (milliseconds)",
    )?;
    Ok(Duration::from_millis(millis))
}

impl RetryPolicy {
    /// Read the retry policy from environment variables.
    ///
    /// - `CRAWLGUARD_RETRY_MAX_ATTEMPTS` (default 3)
    /// - `CRAWLGUARD_RETRY_INITIAL_DELAY_MS` (default 1000)
    /// - `CRAWLGUARD_RETRY_MAX_DELAY_MS` (default 30000)
    /// - `CRAWLGUARD_RETRY_BACKOFF_MULTIPLIER` (default 2.0)
    /// - `CRAWLGUARD_RETRY_JITTER` (default true)
    /// - `CRAWLGUARD_RETRY_ATTEMPT_TIMEOUT_MS` (optional, unbounded when unset)
    /// - `CRAWLGUARD_CIRCUIT_BREAKER_ENABLED` (default true)
    /// - `CRAWLGUARD_CIRCUIT_BREAKER_FAILURE_THRESHOLD` (default 5)
    /// - `CRAWLGUARD_CIRCUIT_BREAKER_RESET_TIMEOUT_MS` (default 60000)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let attempt_timeout = match lookup("CRAWLGUARD_RETRY_ATTEMPT_TIMEOUT_MS") {
            None => None,
            Some(_) => Some(millis_or(
                &lookup,
                "CRAWLGUARD_RETRY_ATTEMPT_TIMEOUT_MS",
                Duration::ZERO,
            )?),
        };

        let policy = Self {
            max_attempts: parse_or(
                &lookup,
                "CRAWLGUARD_RETRY_MAX_ATTEMPTS",
                defaults.max_attempts,
                "a non-negative integer",
            )?,
            initial_delay: millis_or(
                &lookup,
                "CRAWLGUARD_RETRY_INITIAL_DELAY_MS",
                defaults.initial_delay,
            )?,
            max_delay: millis_or(&lookup, "CRAWLGUARD_RETRY_MAX_DELAY_MS", defaults.max_delay)?,
            backoff_multiplier: parse_or(
                &lookup,
                "CRAWLGUARD_RETRY_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
                "a number >= 1.0",
            )?,
            jitter_enabled: bool_or(&lookup, "CRAWLGUARD_RETRY_JITTER", defaults.jitter_enabled)?,
            circuit_breaker_enabled: bool_or(
                &lookup,
                "CRAWLGUARD_CIRCUIT_BREAKER_ENABLED",
                defaults.circuit_breaker_enabled,
            )?,
            failure_threshold: parse_or(
                &lookup,
                "CRAWLGUARD_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                defaults.failure_threshold,
                "a positive integer",
            )?,
            circuit_breaker_reset_timeout: millis_or(
                &lookup,
                "CRAWLGUARD_CIRCUIT_BREAKER_RESET_TIMEOUT_MS",
                defaults.circuit_breaker_reset_timeout,
            )?,
            attempt_timeout,
        };
        policy.validate()?;
        Ok(policy)
    }
}

impl ValidationConfig {
    /// Read the quality gate configuration from environment variables.
    ///
    /// - `CRAWLGUARD_VALIDATION_ENABLED` (default true)
    /// - `CRAWLGUARD_MIN_CONTENT_LENGTH` (default 100)
    /// - `CRAWLGUARD_MAX_CONTENT_LENGTH` (default 1000000)
    /// - `CRAWLGUARD_MAX_HTML_RATIO` (default 0.3)
    /// - `CRAWLGUARD_MIN_WORD_COUNT` (default 10)
    /// - `CRAWLGUARD_MAX_REPETITION_RATIO` (default 0.2)
    /// - `CRAWLGUARD_DUPLICATE_CACHE_SOFT_CAP` (default 10000)
    /// - `CRAWLGUARD_DUPLICATE_CACHE_HARD_CAP` (default 15000)
    /// - `CRAWLGUARD_DISTRIBUTED_DEDUP` (default false)
    /// - `CRAWLGUARD_FALLBACK_TO_LOCAL` (default true)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let d = Self::default();
        let config = Self {
            enabled: bool_or(&lookup, "CRAWLGUARD_VALIDATION_ENABLED", d.enabled)?,
            min_content_length: parse_or(
                &lookup,
                "CRAWLGUARD_MIN_CONTENT_LENGTH",
                d.min_content_length,
                "a non-negative integer",
            )?,
            max_content_length: parse_or(
                &lookup,
                "CRAWLGUARD_MAX_CONTENT_LENGTH",
                d.max_content_length,
                "a non-negative integer",
            )?,
            max_html_ratio: parse_or(
                &lookup,
                "CRAWLGUARD_MAX_HTML_RATIO",
                d.max_html_ratio,
                "a ratio between 0 and 1",
            )?,
            min_word_count: parse_or(
                &lookup,
                "CRAWLGUARD_MIN_WORD_COUNT",
                d.min_word_count,
                "a non-negative integer",
            )?,
            max_repetition_ratio: parse_or(
                &lookup,
                "CRAWLGUARD_MAX_REPETITION_RATIO",
                d.max_repetition_ratio,
                "a ratio between 0 and 1",
            )?,
            duplicate_cache_soft_cap: parse_or(
                &lookup,
                "CRAWLGUARD_DUPLICATE_CACHE_SOFT_CAP",
                d.duplicate_cache_soft_cap,
                "a positive integer",
            )?,
            duplicate_cache_hard_cap: parse_or(
                &lookup,
                "CRAWLGUARD_DUPLICATE_CACHE_HARD_CAP",
                d.duplicate_cache_hard_cap,
                "a positive integer",
            )?,
            distributed_dedup: bool_or(
                &lookup,
                "CRAWLGUARD_DISTRIBUTED_DEDUP",
                d.distributed_dedup,
            )?,
            fallback_to_local: bool_or(
                &lookup,
                "CRAWLGUARD_FALLBACK_TO_LOCAL",
                d.fallback_to_local,
            )?,
        };

        if config.min_content_length > config.max_content_length {
            return Err(AppError::ConfigError(format!(
                "CRAWLGUARD_MIN_CONTENT_LENGTH ({}) exceeds CRAWLGUARD_MAX_CONTENT_LENGTH ({})",
                config.min_content_length, config.max_content_length
            )));
        }
        for (key, ratio) in [
            ("CRAWLGUARD_MAX_HTML_RATIO", config.max_html_ratio),
            ("CRAWLGUARD_MAX_REPETITION_RATIO", config.max_repetition_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(AppError::ConfigError(format!(
                    "{key} must be between 0 and 1, got {ratio}"
                )));
            }
        }
        if config.duplicate_cache_hard_cap == 0 {
            return Err(AppError::ConfigError(
                "CRAWLGUARD_DUPLICATE_CACHE_HARD_CAP must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}

impl DedupConfig {
    /// Read the deduplication store layout from environment variables.
    ///
    /// - `CRAWLGUARD_KEY_PREFIX` (default `crawlguard`)
    /// - `CRAWLGUARD_DEFAULT_TTL_SECS` (optional, no expiry when unset)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Some(prefix) = lookup("CRAWLGUARD_KEY_PREFIX") {
            let prefix = prefix.trim();
            if prefix.is_empty() {
                return Err(AppError::ConfigError(
                    "CRAWLGUARD_KEY_PREFIX must not be empty".into(),
                ));
            }
            config.key_prefix = prefix.to_string();
        }
        if lookup("CRAWLGUARD_DEFAULT_TTL_SECS").is_some() {
            let secs: u64 = parse_or(
                &lookup,
                "CRAWLGUARD_DEFAULT_TTL_SECS",
                0,
                "a positive integer (seconds)",
            )?;
            if secs == 0 {
                return Err(AppError::ConfigError(
                    "CRAWLGUARD_DEFAULT_TTL_SECS must be at least 1".into(),
                ));
            }
            config.default_ttl = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }
}
