//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControlPlaneConfig (validated, immutable)
//!     → handed to each component's constructor
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → control plane applies balancer settings (atomic swap)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Invalid configuration is rejected eagerly, never at selection time
//! - Only balancer settings are hot-reloadable; the rest needs a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, Algorithm, AutoScalingConfig, BalancerConfig, CircuitBreakerConfig, CollectorKind,
    ControlPlaneConfig, DrainConfig, HealthCheckConfig, InstanceTemplate, LogFormat,
    ObservabilityConfig, ServerConfig,
};
