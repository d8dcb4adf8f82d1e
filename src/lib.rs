//! Fleet balancer: a load-balancing and auto-scaling control plane.

pub mod admin;
pub mod autoscale;
pub mod clock;
pub mod config;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use config::ControlPlaneConfig;
pub use events::{ControlEvent, EventBus};
pub use lifecycle::{ControlPlane, Shutdown};
pub use load_balancer::{SelectionEngine, ServerInstance, ServerRegistry};
