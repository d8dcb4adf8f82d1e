//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives → engine.rs select_server(client_ip?, session_id?)
//!     → affinity.rs (sticky session lookup)
//!     → registry.rs (snapshot of healthy servers)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through servers)
//!         - least_conn.rs (pick server with fewest connections)
//!         - weighted.rs (random draw proportional to weight)
//!         - ip_hash.rs (hash client IP onto a server)
//!     → instance.rs (caller tracks the connection)
//!     → Return server or None
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from the round-robin cursor
//! - The registry owns servers; everything else refers to them by ID
//! - Only healthy servers are ever handed to a strategy

pub mod affinity;
pub mod engine;
pub mod instance;
pub mod ip_hash;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::sync::Arc;

pub use engine::SelectionEngine;
pub use instance::{ConnectionGuard, ServerInstance, ServerStatus};
pub use registry::{RegistryError, ServerRegistry};

/// Per-request inputs available to a strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub client_ip: Option<&'a str>,
}

/// A load balancing algorithm.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `servers`, which are all healthy.
    fn next_server(
        &self,
        servers: &[Arc<ServerInstance>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ServerInstance>>;
}

#[cfg(test)]
pub(crate) fn test_servers(ids: &[&str]) -> Vec<Arc<ServerInstance>> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let config = crate::config::ServerConfig {
                id: id.to_string(),
                host: "127.0.0.1".to_string(),
                port: 5000 + i as u16,
                weight: 1,
            };
            Arc::new(ServerInstance::new(&config).unwrap())
        })
        .collect()
}
