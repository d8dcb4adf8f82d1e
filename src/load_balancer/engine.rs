//! Selection engine: the routing entry point.
//!
//! # Data Flow
//! ```text
//! select_server(client_ip?, session_id?)
//!     → sticky session lookup (affinity.rs), if enabled
//!     → registry snapshot filtered to healthy servers
//!     → configured strategy picks one
//!     → affinity refreshed, if enabled
//! ```
//!
//! Selection only reads in-memory state and never blocks on I/O.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::clock::Clock;
use crate::config::validation::validate_balancer;
use crate::config::{Algorithm, BalancerConfig, ConfigError};
use crate::load_balancer::{
    affinity::SessionStore, instance::ServerInstance, ip_hash::IpHash,
    least_conn::LeastConnections, registry::ServerRegistry, round_robin::RoundRobin,
    weighted::Weighted, LoadBalancer, SelectionContext,
};
use crate::observability::metrics;

/// Picks a healthy server for each request.
#[derive(Debug)]
pub struct SelectionEngine {
    registry: Arc<ServerRegistry>,
    settings: ArcSwap<BalancerConfig>,
    sessions: SessionStore,
    clock: Arc<dyn Clock>,
    round_robin: RoundRobin,
    least_connections: LeastConnections,
    weighted: Weighted,
    ip_hash: IpHash,
}

impl SelectionEngine {
    /// Create an engine, rejecting invalid settings.
    pub fn new(
        registry: Arc<ServerRegistry>,
        settings: BalancerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        validate_balancer(&settings).map_err(ConfigError::Validation)?;
        Ok(Self {
            registry,
            settings: ArcSwap::from_pointee(settings),
            sessions: SessionStore::new(),
            clock,
            round_robin: RoundRobin::new(),
            least_connections: LeastConnections::new(),
            weighted: Weighted::new(),
            ip_hash: IpHash::new(),
        })
    }

    /// Pick a healthy server, or `None` when no backend is available.
    pub fn select_server(
        &self,
        client_ip: Option<&str>,
        session_id: Option<&str>,
    ) -> Option<Arc<ServerInstance>> {
        let settings = self.settings.load();
        let now = self.clock.now();
        let sticky_session = session_id.filter(|_| settings.enable_sticky_sessions);

        if let Some(session_id) = sticky_session {
            if let Some(server) = self.sticky_server(session_id) {
                self.sessions
                    .bind(session_id, &server.id, now, settings.session_affinity_ttl());
                metrics::record_selection("sticky", &server.id);
                return Some(server);
            }
        }

        let healthy = self.registry.healthy();
        if healthy.is_empty() {
            tracing::debug!(
                algorithm = %settings.algorithm,
                servers = self.registry.len(),
                "No healthy servers available"
            );
            metrics::record_no_backend(settings.algorithm.as_str());
            return None;
        }

        let ctx = SelectionContext { client_ip };
        let server = self.strategy(settings.algorithm).next_server(&healthy, &ctx)?;

        if let Some(session_id) = sticky_session {
            self.sessions
                .bind(session_id, &server.id, now, settings.session_affinity_ttl());
        }

        metrics::record_selection(settings.algorithm.as_str(), &server.id);
        Some(server)
    }

    /// Replace the selection settings. Invalid settings leave the old ones in place.
    pub fn update_settings(&self, settings: BalancerConfig) -> Result<(), ConfigError> {
        validate_balancer(&settings).map_err(ConfigError::Validation)?;
        let previous = self.settings.swap(Arc::new(settings.clone()));
        if *previous != settings {
            tracing::info!(
                algorithm = %settings.algorithm,
                sticky_sessions = settings.enable_sticky_sessions,
                affinity_ttl_secs = settings.session_affinity_ttl_secs,
                "Balancer settings updated"
            );
        }
        Ok(())
    }

    pub fn settings(&self) -> Arc<BalancerConfig> {
        self.settings.load_full()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Drop expired session bindings.
    pub fn purge_expired_sessions(&self) -> usize {
        let purged = self.sessions.purge_expired(self.clock.now());
        if purged > 0 {
            tracing::debug!(purged, "Expired session affinities purged");
        }
        purged
    }

    /// The bound server if the binding is live and the server healthy.
    /// A stale binding is discarded.
    fn sticky_server(&self, session_id: &str) -> Option<Arc<ServerInstance>> {
        let server_id = self.sessions.lookup(session_id, self.clock.now())?;
        match self.registry.get(&server_id) {
            Some(server) if server.is_healthy() => Some(server),
            _ => {
                tracing::debug!(session = %session_id, server = %server_id, "Discarding stale session affinity");
                self.sessions.unbind(session_id, &server_id);
                None
            }
        }
    }

    fn strategy(&self, algorithm: Algorithm) -> &dyn LoadBalancer {
        match algorithm {
            Algorithm::RoundRobin => &self.round_robin,
            Algorithm::LeastConnections => &self.least_connections,
            Algorithm::Weighted => &self.weighted,
            Algorithm::IpHash => &self.ip_hash,
        }
    }
}
