use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure of the shared key-value store (transport or command level).
///
/// Store clients never retry internally; whether a store failure is retried,
/// falls back to local state, or fails the ingestion is the caller's call.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not reach the store or obtain a connection.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("Store command {op} failed: {message}")]
    Command { op: &'static str, message: String },

    /// A value read from or written to the store could not be (de)serialized.
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// A key component the store layout cannot represent.
    #[error("Invalid key component: {0}")]
    InvalidKey(String),
}

impl StoreError {
    pub fn command(op: &'static str, message: impl fmt::Display) -> Self {
        StoreError::Command {
            op,
            message: message.to_string(),
        }
    }
}

/// Coarse classification of an [`AppError`], used to select which failures
/// the retry executor re-attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Http,
    Store,
    Validation,
    Serialization,
    Config,
    CircuitOpen,
    Cancelled,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Http => "http",
            ErrorCategory::Store => "store",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Config => "config",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application-wide error types for crawlguard.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A single attempt ran past its time bound.
    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Shared key-value store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Content rejected by a named validation rule. Never retried.
    #[error("Validation failed on '{field}': {reason}")]
    Validation { reason: String, field: String },

    /// Every allowed attempt failed with a retryable error.
    #[error("Operation '{operation}' failed after {attempts} attempt(s){}", cause_suffix(.last_error.as_deref()))]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Option<Box<AppError>>,
    },

    /// The circuit breaker is open; the operation was not (or no longer) attempted.
    #[error("Circuit open for '{operation}'{}", cause_suffix(.last_error.as_deref()))]
    CircuitOpen {
        operation: String,
        last_error: Option<Box<AppError>>,
    },

    /// Interrupted while backing off, or cancelled explicitly.
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

fn cause_suffix(cause: Option<&AppError>) -> String {
    cause.map(|e| format!(": {e}")).unwrap_or_default()
}

impl AppError {
    pub fn validation(reason: impl Into<String>, field: impl Into<String>) -> Self {
        AppError::Validation {
            reason: reason.into(),
            field: field.into(),
        }
    }

    /// Category of this error. Terminal retry failures report the category of
    /// the error that exhausted them, or `Unknown` when none was observed.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::HttpError(_) => ErrorCategory::Http,
            AppError::NetworkError(_) => ErrorCategory::Network,
            AppError::Timeout(_) => ErrorCategory::Timeout,
            AppError::RateLimitExceeded => ErrorCategory::RateLimit,
            AppError::Store(StoreError::Serialization(_)) => ErrorCategory::Serialization,
            AppError::Store(_) => ErrorCategory::Store,
            AppError::Validation { .. } => ErrorCategory::Validation,
            AppError::RetryExhausted { last_error, .. } => last_error
                .as_deref()
                .map(AppError::category)
                .unwrap_or(ErrorCategory::Unknown),
            AppError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            AppError::Cancelled { .. } => ErrorCategory::Cancelled,
            AppError::ConfigError(_) => ErrorCategory::Config,
            AppError::Generic(_) => ErrorCategory::Unknown,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::Store(StoreError::Connection(_)) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
                    || msg.contains("HTTP 5")
            }
            _ => false,
        }
    }

    /// True for outcomes that end the current call but are not failures of
    /// the wrapped operation itself.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::RetryExhausted { .. }
                | AppError::CircuitOpen { .. }
                | AppError::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(AppError::HttpError("HTTP 503 Service Unavailable".into()).is_retryable());
        assert!(AppError::Store(StoreError::Connection("refused".into())).is_retryable());
        assert!(!AppError::HttpError("HTTP 404 Not Found".into()).is_retryable());
        assert!(!AppError::validation("too short", "text").is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            AppError::NetworkError("x".into()).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            AppError::Store(StoreError::command("SET", "oops")).category(),
            ErrorCategory::Store
        );
        assert_eq!(
            AppError::Store(StoreError::Serialization("bad json".into())).category(),
            ErrorCategory::Serialization
        );
        assert_eq!(
            AppError::Cancelled {
                operation: "fetch".into()
            }
            .category(),
            ErrorCategory::Cancelled
        );
    }

    #[test]
    fn test_exhausted_reports_last_error_category() {
        let err = AppError::RetryExhausted {
            operation: "fetch".into(),
            attempts: 3,
            last_error: Some(Box::new(AppError::RateLimitExceeded)),
        };
        assert_eq!(err.category(), ErrorCategory::RateLimit);

        let err = AppError::RetryExhausted {
            operation: "fetch".into(),
            attempts: 0,
            last_error: None,
        };
        assert_eq!(err.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_display_preserves_operation_and_attempts() {
        let err = AppError::RetryExhausted {
            operation: "fetch https://example.com".into(),
            attempts: 3,
            last_error: Some(Box::new(AppError::NetworkError("reset".into()))),
        };
        assert_eq!(
            err.to_string(),
            "Operation 'fetch https://example.com' failed after 3 attempt(s): Network error: reset"
        );

        let err = AppError::CircuitOpen {
            operation: "fetch".into(),
            last_error: None,
        };
        assert_eq!(err.to_string(), "Circuit open for 'fetch'");
    }

    #[test]
    fn test_validation_display() {
        let err = AppError::validation("URL must start with http:// or https://", "url");
        assert_eq!(
            err.to_string(),
            "Validation failed on 'url': URL must start with http:// or https://"
        );
        assert!(err.is_terminal());
    }
}
