//! Auto-scaling subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (scaler.rs)
//!     → MetricsCollector::collect (collector.rs), bounded by a timeout
//!     → MetricsWindow (window.rs), time-based eviction
//!     → policy::evaluate (policy.rs), pure
//!     → cooldown check
//!     → registry add (scale-up) / drain (scale-down)
//!     → instanceAdded / instanceRemoved
//! ```

pub mod collector;
pub mod policy;
pub mod scaler;
pub mod window;

pub use collector::{
    CollectError, MetricsCollector, RegistryMetricsCollector, ResourceUsage, SimulatedCollector,
};
pub use policy::{evaluate, ScaleDecision};
pub use scaler::AutoScaler;
pub use window::{MetricsWindow, ScalingMetrics};
