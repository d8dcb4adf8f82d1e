//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (control_plane.rs):
//!     Validate config → Registry + initial fleet → Engine, checker, scaler
//!     → start(): spawn health, scaling, reaper, event logger
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     Ctrl+C / SIGTERM → broadcast → loops exit → drain all
//!     → wait for connections to reach zero, bounded by a timeout
//! ```
//!
//! # Design Decisions
//! - Components never reach for globals; the control plane wires them
//! - Shutdown has a deadline: open connections do not block exit forever

pub mod control_plane;
pub mod shutdown;
pub mod signals;

pub use control_plane::{ControlPlane, ControlPlaneBuilder, ControlPlaneError, StatusReport};
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
