//! Events and reporting.
//!
//! # Data Flow
//! ```text
//! registry / health checker / autoscaler
//!     → bus.rs EventBus::emit (broadcast, never blocks)
//!     → subscribers (event logger, admin tooling, tests)
//!
//! Admin API / CLI
//!     → report.rs HealthReport / ScalingReport
//!     → JSON or plain text
//! ```

pub mod bus;
pub mod report;

pub use bus::{log_events, ControlEvent, EventBus};
pub use report::{HealthReport, ScalingReport, ServerReport};
