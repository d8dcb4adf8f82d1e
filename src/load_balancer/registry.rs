//! Server registry.
//!
//! # Responsibilities
//! - Own every known server instance, in registration order
//! - Serve lock-free snapshots to the selection path
//! - Drain removed servers and delete them once their grace period elapses
//! - Track connections on behalf of the request layer
//!
//! Readers load an `Arc<Vec<_>>` snapshot and never wait for writers.
//! Writers (add, reap) serialize on a mutex and publish a new snapshot.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::clock::Clock;
use crate::config::validation::{validate_server, ValidationError};
use crate::config::ServerConfig;
use crate::events::{ControlEvent, EventBus};
use crate::load_balancer::instance::{ServerInstance, ServerStatus};
use crate::observability::metrics;

/// Errors returned by registry mutations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("server {0} is already registered")]
    Duplicate(String),

    #[error("server {0} not found")]
    NotFound(String),

    #[error("invalid server definition: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Invalid(Vec<ValidationError>),

    #[error("invalid address for server {id}: {source}")]
    Address {
        id: String,
        #[source]
        source: url::ParseError,
    },

    #[error("weight must be at least 1")]
    ZeroWeight,
}

/// The set of known servers.
#[derive(Debug)]
pub struct ServerRegistry {
    servers: ArcSwap<Vec<Arc<ServerInstance>>>,
    write_lock: Mutex<()>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
}

impl ServerRegistry {
    pub fn new(events: EventBus, clock: Arc<dyn Clock>, grace_period: Duration) -> Self {
        Self {
            servers: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            events,
            clock,
            grace_period,
        }
    }

    /// Register a new healthy server.
    pub fn add(&self, config: ServerConfig) -> Result<Arc<ServerInstance>, RegistryError> {
        validate_server(&config).map_err(RegistryError::Invalid)?;
        let instance = ServerInstance::new(&config).map_err(|source| RegistryError::Address {
            id: config.id.clone(),
            source,
        })?;
        let instance = Arc::new(instance);

        {
            let _guard = self.lock();
            let current = self.servers.load();
            if current.iter().any(|s| s.id == config.id) {
                return Err(RegistryError::Duplicate(config.id));
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(instance.clone());
            self.servers.store(Arc::new(next));
        }

        tracing::info!(
            server = %instance.id,
            address = %instance.address(),
            weight = instance.weight(),
            "Server added"
        );
        metrics::record_backend_health(&instance.id, true);
        self.events.emit(ControlEvent::ServerAdded {
            id: instance.id.clone(),
        });
        Ok(instance)
    }

    /// Start draining a server; it is deleted once the grace period elapses.
    ///
    /// Idempotent: unknown or already-draining servers are left alone.
    /// Returns true if a drain was started.
    pub fn remove(&self, id: &str) -> bool {
        let Some(server) = self.get(id) else {
            tracing::debug!(server = %id, "Remove requested for unknown server");
            return false;
        };

        let deadline = self.clock.now() + self.grace_period;
        if !server.begin_drain(deadline) {
            return false;
        }

        tracing::info!(
            server = %id,
            grace_secs = self.grace_period.as_secs(),
            connections = server.current_connections(),
            "Server draining"
        );
        metrics::record_backend_health(id, false);
        self.events.emit(ControlEvent::ServerDraining { id: id.to_string() });
        true
    }

    /// Delete drained servers whose grace period has elapsed.
    ///
    /// Returns the IDs that were deleted.
    pub fn reap_drained(&self) -> Vec<String> {
        let now = self.clock.now();
        let removed: Vec<Arc<ServerInstance>> = {
            let _guard = self.lock();
            let current = self.servers.load();
            let (expired, remaining): (Vec<_>, Vec<_>) = current.iter().cloned().partition(|s| {
                s.is_draining() && s.drain_deadline().is_some_and(|deadline| deadline <= now)
            });
            if expired.is_empty() {
                return Vec::new();
            }
            self.servers.store(Arc::new(remaining));
            expired
        };

        for server in &removed {
            let connections = server.current_connections();
            if connections > 0 {
                tracing::warn!(
                    server = %server.id,
                    connections,
                    "Grace period elapsed with connections still open"
                );
            }
            tracing::info!(server = %server.id, "Server removed");
            metrics::clear_backend(&server.id);
            self.events.emit(ControlEvent::ServerRemoved {
                id: server.id.clone(),
            });
        }

        removed.into_iter().map(|s| s.id.clone()).collect()
    }

    /// Mark every server draining (shutdown). Returns how many started draining.
    pub fn drain_all(&self) -> usize {
        let deadline = self.clock.now() + self.grace_period;
        let mut started = 0;
        for server in self.servers.load().iter() {
            if server.begin_drain(deadline) {
                self.events.emit(ControlEvent::ServerDraining {
                    id: server.id.clone(),
                });
                started += 1;
            }
        }
        started
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServerInstance>> {
        self.servers.load().iter().find(|s| s.id == id).cloned()
    }

    /// Snapshot of every server in registration order.
    pub fn all(&self) -> Arc<Vec<Arc<ServerInstance>>> {
        self.servers.load_full()
    }

    /// Healthy servers in registration order.
    pub fn healthy(&self) -> Vec<Arc<ServerInstance>> {
        self.servers
            .load()
            .iter()
            .filter(|s| s.is_healthy())
            .cloned()
            .collect()
    }

    /// Change a server's weight.
    pub fn update_weight(&self, id: &str, weight: u32) -> Result<(), RegistryError> {
        if weight == 0 {
            return Err(RegistryError::ZeroWeight);
        }
        let server = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let previous = server.weight();
        server.set_weight(weight);
        tracing::info!(server = %id, previous, weight, "Server weight updated");
        Ok(())
    }

    /// Record a connection opening or closing on a server.
    ///
    /// Returns false for unknown servers.
    pub fn track_connection(&self, id: &str, is_connect: bool) -> bool {
        let Some(server) = self.get(id) else {
            tracing::debug!(server = %id, is_connect, "Connection tracked for unknown server");
            return false;
        };
        if is_connect {
            server.inc_connections();
        } else {
            server.dec_connections();
        }
        metrics::record_backend_connections(id, server.current_connections());
        true
    }

    /// Servers that are not draining.
    pub fn active_count(&self) -> usize {
        self.servers.load().iter().filter(|s| !s.is_draining()).count()
    }

    pub fn count_by_status(&self, status: ServerStatus) -> usize {
        self.servers.load().iter().filter(|s| s.status() == status).count()
    }

    pub fn total_connections(&self) -> usize {
        self.servers.load().iter().map(|s| s.current_connections()).sum()
    }

    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn server(id: &str, port: u16) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight: 1,
        }
    }

    fn registry() -> (ServerRegistry, Arc<ManualClock>, EventBus) {
        let clock = Arc::new(ManualClock::new());
        let events = EventBus::new();
        let registry = ServerRegistry::new(events.clone(), clock.clone(), Duration::from_secs(30));
        (registry, clock, events)
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let (registry, _, _) = registry();
        registry.add(server("a", 3000)).unwrap();
        let err = registry.add(server("a", 3001)).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_rejects_invalid_server() {
        let (registry, _, _) = registry();
        let mut bad = server("a", 3000);
        bad.weight = 0;
        assert!(matches!(registry.add(bad), Err(RegistryError::Invalid(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_preserves_registration_order() {
        let (registry, _, _) = registry();
        for (i, id) in ["c", "a", "b"].iter().enumerate() {
            registry.add(server(id, 3000 + i as u16)).unwrap();
        }
        let ids: Vec<_> = registry.all().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remove_drains_then_deletes() {
        let (registry, clock, events) = registry();
        let mut rx = events.subscribe();
        registry.add(server("a", 3000)).unwrap();

        assert!(registry.remove("a"));
        assert_eq!(registry.get("a").unwrap().status(), ServerStatus::Draining);
        assert!(registry.healthy().is_empty());

        clock.advance(Duration::from_secs(29));
        assert!(registry.reap_drained().is_empty());
        assert_eq!(registry.len(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(registry.reap_drained(), vec!["a".to_string()]);
        assert!(registry.get("a").is_none());

        assert_eq!(rx.try_recv().unwrap(), ControlEvent::ServerAdded { id: "a".into() });
        assert_eq!(rx.try_recv().unwrap(), ControlEvent::ServerDraining { id: "a".into() });
        assert_eq!(rx.try_recv().unwrap(), ControlEvent::ServerRemoved { id: "a".into() });
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (registry, clock, _) = registry();
        registry.add(server("a", 3000)).unwrap();

        assert!(!registry.remove("missing"));
        assert!(registry.remove("a"));

        // A second remove must not push the deadline out
        clock.advance(Duration::from_secs(20));
        assert!(!registry.remove("a"));
        clock.advance(Duration::from_secs(10));
        assert_eq!(registry.reap_drained().len(), 1);
    }

    #[test]
    fn test_update_weight() {
        let (registry, _, _) = registry();
        registry.add(server("a", 3000)).unwrap();

        registry.update_weight("a", 5).unwrap();
        assert_eq!(registry.get("a").unwrap().weight(), 5);

        assert!(matches!(registry.update_weight("b", 2), Err(RegistryError::NotFound(_))));
        assert!(matches!(registry.update_weight("a", 0), Err(RegistryError::ZeroWeight)));
    }

    #[test]
    fn test_track_connection() {
        let (registry, _, _) = registry();
        registry.add(server("a", 3000)).unwrap();

        assert!(registry.track_connection("a", true));
        assert!(registry.track_connection("a", true));
        assert!(registry.track_connection("a", false));
        assert_eq!(registry.get("a").unwrap().current_connections(), 1);
        assert_eq!(registry.total_connections(), 1);

        assert!(!registry.track_connection("zzz", true));
    }

    #[test]
    fn test_drain_all() {
        let (registry, _, _) = registry();
        registry.add(server("a", 3000)).unwrap();
        registry.add(server("b", 3001)).unwrap();
        registry.remove("a");

        assert_eq!(registry.drain_all(), 1);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.count_by_status(ServerStatus::Draining), 2);
    }
}
