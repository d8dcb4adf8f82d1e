//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each server concurrently (probe.rs), bounded by a timeout
//!     → Optionally through a per-server circuit breaker
//!     → Update server state (state.rs rules)
//!     → Emit serverFailed / serverRecovered / healthCheckCompleted
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy, driven by a decaying error rate
//! ```
//!
//! # Design Decisions
//! - A failed probe is a state change, never an error out of the round
//! - Probes are pluggable; HTTP is the production implementation
//! - Health state is per-server

pub mod active;
pub mod probe;
pub mod state;

pub use active::{HealthChecker, RoundSummary};
pub use probe::{HealthProbe, HttpProbe, ProbeError};
