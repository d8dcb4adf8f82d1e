//! Server health state machine.
//!
//! # States
//! - Healthy: server receives traffic
//! - Unhealthy: server excluded from selection, still probed
//! - Draining: server excluded from selection and probing, awaiting deletion
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: probe fails and error_rate >= failover_threshold
//! Unhealthy → Healthy: any successful probe
//! Healthy/Unhealthy → Draining: removal or shutdown (terminal)
//! ```
//!
//! # Error rate
//! Each failed probe adds 1.0, each success subtracts 0.1, clamped to [0, 100].
//! Slow decay means a recovered server that fails again is failed over quickly.

/// Weight of the newest sample in the response time moving average.
pub const EMA_SMOOTHING: f64 = 0.2;

/// Error rate added per failed probe.
pub const ERROR_RATE_STEP: f64 = 1.0;

/// Error rate removed per successful probe.
pub const ERROR_RATE_DECAY: f64 = 0.1;

pub const MAX_ERROR_RATE: f64 = 100.0;

/// A health transition caused by a probe result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthTransition {
    Recovered,
    Failed { error_rate: f64 },
}

/// Fold a new response time sample into the moving average.
///
/// The first sample seeds the average directly.
pub fn ema(previous: Option<f64>, sample_ms: f64) -> f64 {
    match previous {
        Some(old) => (1.0 - EMA_SMOOTHING) * old + EMA_SMOOTHING * sample_ms,
        None => sample_ms,
    }
}

pub fn decay_error_rate(rate: f64) -> f64 {
    (rate - ERROR_RATE_DECAY).max(0.0)
}

pub fn bump_error_rate(rate: f64) -> f64 {
    (rate + ERROR_RATE_STEP).min(MAX_ERROR_RATE)
}
