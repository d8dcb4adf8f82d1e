//! Resilience primitives.
//!
//! # Data Flow
//! ```text
//! Call to a flaky dependency (e.g. a health probe):
//!     → circuit_breaker.rs (fail fast while the dependency is known bad)
//!     → one trial call after the recovery timeout
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
