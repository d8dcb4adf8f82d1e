//! Circuit breaker for downstream call protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: one trial call tests whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per protected operation, no shared state
//! - Fail fast in Open state with a typed rejection distinct from the
//!   operation's own error
//! - Single trial in Half-Open; concurrent callers are rejected until it
//!   settles
//! - A trial whose future is dropped counts as a failure

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Result of a call through the breaker.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call; the operation was not invoked.
    #[error("circuit breaker is open")]
    Open,
    /// The operation ran and failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::Open => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// A circuit breaker around one downstream operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `CircuitBreakerError::Open` without calling `op` when the
    /// breaker is open and the recovery timeout has not elapsed.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.admit().ok_or(CircuitBreakerError::Open)?;
        let result = op().await;
        permit.complete(result.is_ok());
        result.map_err(CircuitBreakerError::Inner)
    }

    /// Decide whether a call may proceed.
    fn admit(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = inner
                    .last_failure_time
                    .map(|t| now.duration_since(t))
                    .unwrap_or_default();
                if elapsed <= self.config.recovery_timeout() {
                    return None;
                }
                self.set_state(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Some(Permit {
            breaker: self,
            trial,
            done: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if trial => {
                inner.failure_count = 0;
                self.set_state(&mut inner, CircuitState::Closed);
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        let now = self.clock.now();
        if trial {
            inner.trial_in_flight = false;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_time = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    self.set_state(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_time = Some(now);
                self.set_state(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn set_state(&self, inner: &mut BreakerState, next: CircuitState) {
        if inner.state == next {
            return;
        }
        let previous = inner.state;
        inner.state = next;
        match next {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                recovery_ms = self.config.recovery_timeout_ms,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = previous.as_str(),
                to = next.as_str(),
                "Circuit breaker state changed"
            ),
        }
        metrics::record_circuit_state(&self.name, next);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission for one call. Dropping it unfinished records a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    done: bool,
}

impl Permit<'_> {
    fn complete(&mut self, success: bool) {
        self.done = true;
        if success {
            self.breaker.on_success(self.trial);
        } else {
            self.breaker.on_failure(self.trial);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.on_failure(self.trial);
        }
    }
}
