//! Retrying executor with exponential backoff, jitter and a shared circuit breaker.
//!
//! Delay schedule for attempt `k` (1-indexed), before jitter:
//!
//! ```text
//! min(initial_delay * backoff_multiplier^(k-1), max_delay)
//! ```
//!
//! With jitter on, the delay is scaled by a factor drawn uniformly from
//! `[0.75, 1.25]`. The backoff sleep is the only suspension point owned by the
//! executor and races the executor's [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{AppError, ErrorCategory};

const JITTER_MIN: f64 = 0.75;
const JITTER_MAX: f64 = 1.25;

/// Retry configuration, supplied per executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    pub circuit_breaker_enabled: bool,
    pub failure_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    /// Upper bound for a single invocation. `None` leaves attempts unbounded.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            circuit_breaker_enabled: true,
            failure_threshold: 5,
            circuit_breaker_reset_timeout: Duration::from_secs(60),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    pub fn with_circuit_breaker(mut self, enabled: bool, failure_threshold: u32) -> Self {
        self.circuit_breaker_enabled = enabled;
        self.failure_threshold = failure_threshold;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(AppError::ConfigError(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(AppError::ConfigError(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        if self.circuit_breaker_enabled && self.failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "circuit breaker failure threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Pre-jitter delay after the given (1-indexed) failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }

    /// Scale a delay by a random factor in `[0.75, 1.25]`.
    pub fn jittered(delay: Duration) -> Duration {
        let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }

    /// Delay actually slept after the given failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter_enabled {
            Self::jittered(delay)
        } else {
            delay
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.circuit_breaker_reset_timeout,
            ..Default::default()
        }
    }
}

/// Which failures the executor re-attempts.
///
/// Validation failures, cancellations and open-circuit rejections are
/// terminal under every variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetryOn {
    /// Every error.
    #[default]
    All,
    /// Errors for which [`AppError::is_retryable`] holds.
    Transient,
    /// Only errors in the listed categories.
    Categories(Vec<ErrorCategory>),
}

impl RetryOn {
    pub fn categories(categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        RetryOn::Categories(categories.into_iter().collect())
    }

    pub fn matches(&self, error: &AppError) -> bool {
        if matches!(
            error,
            AppError::Validation { .. } | AppError::Cancelled { .. } | AppError::CircuitOpen { .. }
        ) {
            return false;
        }
        match self {
            RetryOn::All => true,
            RetryOn::Transient => error.is_retryable(),
            RetryOn::Categories(categories) => categories.contains(&error.category()),
        }
    }
}

/// Re-invokes a fallible async operation according to a [`RetryPolicy`].
///
/// Cloning is cheap; clones share the circuit breaker and cancellation token.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Option<CircuitBreaker>,
    cancel: CancellationToken,
}

impl RetryExecutor {
    /// Executor with its own breaker named `name` (if the policy enables one).
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        let breaker = policy
            .circuit_breaker_enabled
            .then(|| CircuitBreaker::new(name, policy.circuit_breaker_config()));
        Self {
            policy,
            breaker,
            cancel: CancellationToken::new(),
        }
    }

    /// Executor sharing an existing breaker, e.g. one per operation class
    /// handed to every worker. Ignored if the policy disables breaking.
    pub fn with_breaker(policy: RetryPolicy, breaker: CircuitBreaker) -> Self {
        let breaker = policy.circuit_breaker_enabled.then_some(breaker);
        Self {
            policy,
            breaker,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// [`execute_with_retry`](Self::execute_with_retry) retrying on every error.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.execute_with_retry(operation_name, &RetryOn::All, operation)
            .await
    }

    /// Run `operation` until it succeeds, hits a non-retryable error, opens the
    /// breaker, or runs out of attempts.
    ///
    /// Only retryable failures are recorded on the breaker; an error that does
    /// not match `retry_on` is returned as-is without touching it. An open
    /// breaker fails fast with [`AppError::CircuitOpen`] naming the operation,
    /// and a cancelled token yields [`AppError::Cancelled`] before any further
    /// attempt.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        retry_on: &RetryOn,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut last_error: Option<AppError> = None;
        let mut attempt = 0;

        while attempt < max_attempts {
            if self.cancel.is_cancelled() {
                tracing::info!(operation = %operation_name, attempt, "Retry cancelled before attempt");
                return Err(AppError::Cancelled {
                    operation: operation_name.to_string(),
                });
            }

            if let Some(breaker) = &self.breaker
                && !breaker.try_acquire()
            {
                tracing::warn!(
                    operation = %operation_name,
                    circuit = %breaker.name(),
                    "Circuit open, rejecting call"
                );
                return Err(AppError::CircuitOpen {
                    operation: operation_name.to_string(),
                    last_error: last_error.map(Box::new),
                });
            }

            attempt += 1;
            let error = match self.run_attempt(&mut operation).await {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    if attempt > 1 {
                        tracing::info!(
                            operation = %operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !retry_on.matches(&error) {
                if let Some(breaker) = &self.breaker {
                    breaker.release_probe();
                }
                tracing::debug!(
                    operation = %operation_name,
                    attempt,
                    category = %error.category(),
                    error = %error,
                    "Non-retryable error, giving up"
                );
                return Err(error);
            }

            if let Some(breaker) = &self.breaker
                && breaker.record_failure(&error)
            {
                return Err(AppError::CircuitOpen {
                    operation: operation_name.to_string(),
                    last_error: Some(Box::new(error)),
                });
            }

            if attempt >= max_attempts {
                last_error = Some(error);
                break;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tracing::warn!(
                operation = %operation_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, backing off"
            );
            last_error = Some(error);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(operation = %operation_name, attempt, "Retry cancelled during backoff");
                    return Err(AppError::Cancelled {
                        operation: operation_name.to_string(),
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::error!(
            operation = %operation_name,
            attempts = attempt,
            "Retries exhausted"
        );
        Err(AppError::RetryExhausted {
            operation: operation_name.to_string(),
            attempts: attempt,
            last_error: last_error.map(Box::new),
        })
    }

    async fn run_attempt<T, F, Fut>(&self, operation: &mut F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        match self.policy.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, operation())
                .await
                .unwrap_or(Err(AppError::Timeout(limit))),
            None => operation().await,
        }
    }
}
