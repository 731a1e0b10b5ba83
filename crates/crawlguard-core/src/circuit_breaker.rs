//! Circuit breaker shared by every retrying call of one operation class.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[threshold consecutive failures]--> OPEN (rejecting)
//!    ^                                                       |
//!    +-------------[record_success() / reset()]--------------+
//! ```
//!
//! An open circuit stays open until a success is recorded through some other
//! path or an operator calls [`CircuitBreaker::reset`]. Timed probing is
//! available behind [`CircuitBreakerConfig::half_open_probe`] and is off by
//! default: with it on, an open circuit turns HALF_OPEN once `reset_timeout`
//! has elapsed, the next success closes it and the next failure re-opens it.
//! A half-open circuit admits one probe at a time through
//! [`CircuitBreaker::try_acquire`]; a probe that never reports back stops
//! blocking others after another `reset_timeout`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Probe window after `reset_timeout` (only with `half_open_probe`).
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit waits before a probe is allowed.
    /// Only consulted when `half_open_probe` is set.
    pub reset_timeout: Duration,

    /// Allow a timed half-open probe instead of waiting for a manual reset.
    pub half_open_probe: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_probe: false,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    probe_started: Option<Instant>,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            last_error_message: None,
            probe_started: None,
        }
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub time_since_last_failure: Option<Duration>,
}

/// Thread-safe circuit breaker. Clones share state, so one instance can be
/// handed to every executor of the same operation class.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Ask to run one call. Closed admits everyone and open admits no one.
    /// Half-open admits a single probe until it records a result.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let idle = inner
                    .probe_started
                    .is_none_or(|started| started.elapsed() >= self.config.reset_timeout);
                if idle {
                    tracing::debug!(circuit = %self.name, "Admitting half-open probe");
                    inner.probe_started = Some(Instant::now());
                }
                idle
            }
        }
    }

    /// Give up a probe slot without a verdict, e.g. after an error the
    /// breaker does not count.
    pub fn release_probe(&self) {
        self.lock_inner().probe_started = None;
    }

    pub fn failure_count(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.consecutive_failures,
            last_error: inner.last_error_message.clone(),
            time_since_last_failure: inner.last_failure_time.map(|t| t.elapsed()),
        }
    }

    /// Zeroes the failure count and closes the circuit from any state.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        if inner.state != CircuitState::Closed {
            tracing::info!(
                circuit = %self.name,
                from = %inner.state,
                "Circuit breaker closing after success"
            );
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probe_started = None;
    }

    /// Records one failure. Returns `true` iff this call moved the circuit
    /// to open; recording into an already open circuit changes nothing.
    pub fn record_failure(&self, error: &AppError) -> bool {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());

                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.probe_started = None;
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());
                true
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
                false
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::new();
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if self.config.half_open_probe
            && inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.reset_timeout
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
        }
    }
}
