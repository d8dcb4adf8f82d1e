//! Control plane: wires every component and owns their background tasks.
//!
//! # Responsibilities
//! - Validate configuration and register the initial fleet
//! - Spawn the health, scaling, reaper and event-logging loops
//! - Expose the registration and routing API
//! - Apply reloaded configuration at runtime
//! - Shut down gracefully: stop loops, drain, wait for connections

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::autoscale::{AutoScaler, MetricsCollector, RegistryMetricsCollector, SimulatedCollector};
use crate::clock::{Clock, SystemClock};
use crate::config::validation::validate_config;
use crate::config::{
    CircuitBreakerConfig, CollectorKind, ConfigError, ControlPlaneConfig, DrainConfig,
    ServerConfig,
};
use crate::events::{log_events, EventBus, HealthReport, ScalingReport};
use crate::health::{HealthChecker, HealthProbe, HttpProbe, RoundSummary};
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::{
    RegistryError, SelectionEngine, ServerInstance, ServerRegistry, ServerStatus,
};
use crate::resilience::CircuitBreaker;

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to register server: {0}")]
    Registry(#[from] RegistryError),
}

/// Process-level summary served by the admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub uptime_secs: u64,
    pub algorithm: String,
    pub sticky_sessions: bool,
    pub active_sessions: usize,
    pub servers: usize,
    pub healthy: usize,
    pub draining: usize,
    pub autoscaling_enabled: bool,
    pub shutting_down: bool,
}

/// Builder for [`ControlPlane`]; the clock, probe and collector are swappable.
pub struct ControlPlaneBuilder {
    config: ControlPlaneConfig,
    clock: Option<Arc<dyn Clock>>,
    probe: Option<Arc<dyn HealthProbe>>,
    collector: Option<Arc<dyn MetricsCollector>>,
}

impl ControlPlaneBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn build(self) -> Result<ControlPlane, ControlPlaneError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let events = EventBus::new();
        let registry = Arc::new(ServerRegistry::new(
            events.clone(),
            clock.clone(),
            config.drain.grace_period(),
        ));
        for server in &config.servers {
            registry.add(server.clone())?;
        }

        let engine = Arc::new(SelectionEngine::new(
            registry.clone(),
            config.balancer.clone(),
            clock.clone(),
        )?);

        let probe: Arc<dyn HealthProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new(&config.health_check.path)),
        };
        let health = Arc::new(HealthChecker::new(
            registry.clone(),
            probe,
            config.health_check.clone(),
            clock.clone(),
            events.clone(),
        )?);

        let collector: Arc<dyn MetricsCollector> = match (self.collector, config.autoscaling.collector) {
            (Some(collector), _) => collector,
            (None, CollectorKind::Registry) => Arc::new(RegistryMetricsCollector::new(
                registry.clone(),
                clock.clone(),
                config.autoscaling.connections_per_instance,
            )),
            (None, CollectorKind::Simulated) => Arc::new(SimulatedCollector::default()),
        };
        let scaler = Arc::new(AutoScaler::new(
            registry.clone(),
            collector,
            config.autoscaling.clone(),
            clock.clone(),
            events.clone(),
        )?);

        tracing::info!(
            servers = registry.len(),
            algorithm = %config.balancer.algorithm,
            health_checks = config.health_check.enabled,
            autoscaling = config.autoscaling.enabled,
            "Control plane initialized"
        );

        Ok(ControlPlane {
            started_at: clock.now(),
            registry,
            engine,
            health,
            scaler,
            events,
            clock,
            drain: config.drain.clone(),
            breaker_defaults: config.circuit_breaker.clone(),
            autoscaling_enabled: config.autoscaling.enabled,
            configured_servers: Mutex::new(config.servers),
            shutdown: Shutdown::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

pub struct ControlPlane {
    registry: Arc<ServerRegistry>,
    engine: Arc<SelectionEngine>,
    health: Arc<HealthChecker>,
    scaler: Arc<AutoScaler>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    drain: DrainConfig,
    breaker_defaults: CircuitBreakerConfig,
    autoscaling_enabled: bool,
    /// Servers listed in the last applied config file.
    configured_servers: Mutex<Vec<ServerConfig>>,
    shutdown: Shutdown,
    started: AtomicBool,
    started_at: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControlPlane {
    pub fn builder(config: ControlPlaneConfig) -> ControlPlaneBuilder {
        ControlPlaneBuilder {
            config,
            clock: None,
            probe: None,
            collector: None,
        }
    }

    /// Build with production defaults.
    pub fn new(config: ControlPlaneConfig) -> Result<Self, ControlPlaneError> {
        Self::builder(config).build()
    }

    /// Spawn the background loops. Calling it twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("Control plane already started");
            return;
        }

        let mut tasks = self.lock_tasks();

        tasks.push(tokio::spawn(log_events(
            self.events.subscribe(),
            self.shutdown.subscribe(),
        )));

        let health = self.health.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { health.run(rx).await }));

        let scaler = self.scaler.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { scaler.run(rx).await }));

        tasks.push(tokio::spawn(reap_loop(
            self.registry.clone(),
            self.engine.clone(),
            self.drain.clone(),
            self.shutdown.subscribe(),
        )));

        tracing::info!(tasks = tasks.len(), "Control plane started");
    }

    pub fn add_server(&self, config: ServerConfig) -> Result<Arc<ServerInstance>, RegistryError> {
        self.registry.add(config)
    }

    /// Drain a server. Idempotent; returns true if a drain was started.
    pub fn remove_server(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    pub fn update_server_weight(&self, id: &str, weight: u32) -> Result<(), RegistryError> {
        self.registry.update_weight(id, weight)
    }

    pub fn select_server(
        &self,
        client_ip: Option<&str>,
        session_id: Option<&str>,
    ) -> Option<Arc<ServerInstance>> {
        self.engine.select_server(client_ip, session_id)
    }

    pub fn track_connection(&self, server_id: &str, is_connect: bool) -> bool {
        self.registry.track_connection(server_id, is_connect)
    }

    /// Run one health round right away, outside the periodic schedule.
    pub async fn check_health_now(&self) -> RoundSummary {
        self.health.check_all().await
    }

    /// A breaker for one downstream operation, using the configured defaults.
    pub fn circuit_breaker(&self, name: impl Into<String>) -> CircuitBreaker {
        CircuitBreaker::new(name, self.breaker_defaults.clone(), self.clock.clone())
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::from_registry(&self.registry, self.clock.now())
    }

    pub fn scaling_report(&self) -> ScalingReport {
        self.scaler.report()
    }

    pub fn status(&self) -> StatusReport {
        let settings = self.engine.settings();
        StatusReport {
            uptime_secs: self.clock.now().duration_since(self.started_at).as_secs(),
            algorithm: settings.algorithm.to_string(),
            sticky_sessions: settings.enable_sticky_sessions,
            active_sessions: self.engine.sessions().len(),
            servers: self.registry.len(),
            healthy: self.registry.count_by_status(ServerStatus::Healthy),
            draining: self.registry.count_by_status(ServerStatus::Draining),
            autoscaling_enabled: self.autoscaling_enabled,
            shutting_down: self.shutdown.is_triggered(),
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<SelectionEngine> {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Apply a reloaded configuration.
    ///
    /// Balancer settings are swapped in place. The configured fleet is
    /// reconciled: new entries are added, dropped entries drained, weights
    /// updated. Health, scaling and drain settings apply on restart.
    pub fn apply_config(&self, config: ControlPlaneConfig) -> Result<(), ControlPlaneError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        self.engine.update_settings(config.balancer.clone())?;

        let mut configured = self
            .configured_servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for previous in configured.iter() {
            if !config.servers.iter().any(|s| s.id == previous.id) {
                self.registry.remove(&previous.id);
            }
        }

        for server in &config.servers {
            match self.registry.get(&server.id) {
                Some(existing) if existing.is_draining() => {
                    tracing::warn!(server = %server.id, "Configured server is draining, not re-adding");
                }
                Some(existing) => {
                    if existing.host != server.host || existing.port != server.port {
                        tracing::warn!(
                            server = %server.id,
                            "Address changes need the server removed and re-added"
                        );
                    }
                    if existing.weight() != server.weight {
                        self.registry.update_weight(&server.id, server.weight)?;
                    }
                }
                None => {
                    self.registry.add(server.clone())?;
                }
            }
        }

        *configured = config.servers;
        tracing::info!("Configuration applied");
        Ok(())
    }

    /// Apply configs from a watcher channel until shutdown.
    pub fn watch_config_updates(
        self: &Arc<Self>,
        mut updates: mpsc::UnboundedReceiver<ControlPlaneConfig>,
    ) -> JoinHandle<()> {
        let plane = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        let Some(config) = update else { break };
                        if let Err(e) = plane.apply_config(config) {
                            tracing::error!(error = %e, "Rejected configuration update");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// A receiver that resolves when shutdown starts.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Stop the loops, drain every server and wait for connections to close.
    ///
    /// Returns the connections still open when the drain window ran out.
    pub async fn shutdown(&self) -> usize {
        if !self.shutdown.trigger() {
            return self.registry.total_connections();
        }
        tracing::info!("Control plane shutting down");

        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        let drained = self.registry.drain_all();
        tracing::info!(servers = drained, "All servers draining");

        let timeout = self.drain.shutdown_timeout();
        let poll = self.drain.reap_interval().min(timeout);
        let registry = self.registry.clone();
        let wait = async move {
            while registry.total_connections() > 0 {
                time::sleep(poll).await;
            }
        };

        let remaining = match time::timeout(timeout, wait).await {
            Ok(()) => 0,
            Err(_) => self.registry.total_connections(),
        };
        if remaining > 0 {
            tracing::warn!(
                connections = remaining,
                timeout_secs = timeout.as_secs(),
                "Drain window elapsed with connections still open"
            );
        } else {
            tracing::info!("All connections drained");
        }
        remaining
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Delete servers whose drain grace period elapsed and purge stale sessions.
async fn reap_loop(
    registry: Arc<ServerRegistry>,
    engine: Arc<SelectionEngine>,
    drain: DrainConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(drain.reap_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                registry.reap_drained();
                engine.purge_expired_sessions();
            }
            _ = shutdown.recv() => {
                tracing::debug!("Reaper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
