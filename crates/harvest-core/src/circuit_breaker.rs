//! Circuit breaker for the fetch path.
//!
//! Stops hammering a host that keeps failing: after enough consecutive
//! failures every call is rejected until a cooldown has passed, then a single
//! trial call decides whether to resume.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (one trial)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <---------------------------[success]----------------------------+
//! ```
//!
//! A breaker is an explicit value owned by whatever wraps the operation it
//! guards. Clones share state, so all workers of a run see the same circuit.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - one trial request is let through.
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

    /// Time to stay open before the next call becomes a trial.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    /// Set while the single half-open trial is executing.
    trial_in_flight: bool,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            last_error_message: None,
            trial_in_flight: false,
        }
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    /// Circuit is open - request was rejected without calling the service.
    #[error("Circuit breaker '{name}' is open. Retry after {} seconds.", .retry_after.as_secs())]
    Open { name: String, retry_after: Duration },
    /// The inner operation failed.
    #[error("{0}")]
    Inner(AppError),
}

impl From<CircuitBreakerError> for AppError {
    fn from(e: CircuitBreakerError) -> Self {
        match e {
            CircuitBreakerError::Open { name, retry_after } => {
                AppError::CircuitOpen { name, retry_after }
            }
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}

/// Thread-safe circuit breaker guarding one operation.
#[derive(Clone)]
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

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state. Does not consume the half-open trial.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock_inner();
        if inner.state == CircuitState::Open && self.cooldown_elapsed(&inner) {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock_inner();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error_message.clone(),
            time_until_half_open: (inner.state == CircuitState::Open)
                .then(|| self.remaining_cooldown(&inner)),
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately, unless the
    ///   recovery timeout has passed, in which case this call becomes the trial
    /// - HalfOpen: only the single trial runs; concurrent callers are rejected
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let is_trial = self.try_acquire()?;
        let mut slot = TrialSlot {
            breaker: self,
            held: is_trial,
        };

        let result = operation().await;

        match &result {
            Ok(_) => {
                self.record_success();
                slot.settled();
            }
            Err(e) if e.should_trip_circuit() => {
                self.record_failure(e);
                slot.settled();
            }
            Err(_) => {}
        }
        drop(slot);

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen when due.
    /// `Ok(true)` means this caller holds the half-open trial slot.
    fn try_acquire(&self) -> Result<bool, CircuitBreakerError> {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open if self.cooldown_elapsed(&inner) => {
                tracing::info!(
                    circuit = %self.name,
                    "Circuit breaker transitioning to half-open state"
                );
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::Open | CircuitState::HalfOpen => Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_after: self.remaining_cooldown(&inner),
            }),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        if inner.state == CircuitState::HalfOpen {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker closing after successful trial call"
            );
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_error_message = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
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
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker trial failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    /// Free the half-open trial slot without changing state.
    fn release_trial(&self) {
        self.lock_inner().trial_in_flight = false;
    }

    fn cooldown_elapsed(&self, inner: &CircuitBreakerInner) -> bool {
        inner
            .last_failure_time
            .is_none_or(|t| t.elapsed() > self.config.recovery_timeout)
    }

    fn remaining_cooldown(&self, inner: &CircuitBreakerInner) -> Duration {
        inner
            .last_failure_time
            .map(|t| self.config.recovery_timeout.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

/// The half-open trial slot held by one `call`.
///
/// Released on drop unless the outcome was recorded, so a trial whose future
/// is dropped mid-flight (outer timeout, aborted task) or that ends in a
/// non-tripping error does not leave the circuit stuck half-open.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl TrialSlot<'_> {
    /// `record_success`/`record_failure` already cleared the slot.
    fn settled(&mut self) {
        self.held = false;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.release_trial();
        }
    }
}
