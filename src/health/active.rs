//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every non-draining server
//! - Update server health state based on results
//! - Emit failure/recovery events and a per-round summary

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::validation::validate_health_check;
use crate::config::{ConfigError, HealthCheckConfig};
use crate::events::{ControlEvent, EventBus};
use crate::health::probe::{HealthProbe, ProbeError};
use crate::health::state::HealthTransition;
use crate::load_balancer::{ServerInstance, ServerRegistry};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError};

/// Totals for one health check round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

pub struct HealthChecker {
    registry: Arc<ServerRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl HealthChecker {
    /// Create a checker, rejecting invalid settings.
    pub fn new(
        registry: Arc<ServerRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: HealthCheckConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        validate_health_check(&config).map_err(ConfigError::Validation)?;
        Ok(Self {
            registry,
            probe,
            config,
            clock,
            events,
            breakers: DashMap::new(),
        })
    }

    /// Probe on a fixed interval until shutdown.
    ///
    /// A round finishes before the next tick is taken, so rounds never overlap.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_ms = self.config.timeout_ms,
            path = %self.config.path,
            "Health checker starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one round: probe every non-draining server concurrently.
    pub async fn check_all(&self) -> RoundSummary {
        let started = Instant::now();
        let servers: Vec<Arc<ServerInstance>> = self
            .registry
            .all()
            .iter()
            .filter(|s| !s.is_draining())
            .cloned()
            .collect();

        self.prune_breakers(&servers);

        let results = join_all(servers.iter().map(|server| self.check_one(server))).await;

        let summary = RoundSummary {
            checked: results.len(),
            healthy: results.iter().filter(|healthy| **healthy).count(),
            unhealthy: results.iter().filter(|healthy| !**healthy).count(),
        };
        let elapsed = started.elapsed();

        metrics::record_health_round(elapsed, summary.healthy, summary.unhealthy);
        self.events.emit(ControlEvent::HealthCheckCompleted {
            checked: summary.checked,
            healthy: summary.healthy,
            unhealthy: summary.unhealthy,
            duration_ms: elapsed.as_millis() as u64,
        });
        summary
    }

    /// Probe one server and apply the result. Returns whether it is healthy afterwards.
    async fn check_one(&self, server: &Arc<ServerInstance>) -> bool {
        let outcome = match self.breaker_for(&server.id) {
            Some(breaker) => breaker
                .execute(|| self.timed_probe(server))
                .await
                .map_err(|e| match e {
                    CircuitBreakerError::Open => ProbeError::CircuitOpen,
                    CircuitBreakerError::Inner(e) => e,
                }),
            None => self.timed_probe(server).await,
        };

        match outcome {
            Ok(latency) => {
                if let Some(HealthTransition::Recovered) =
                    server.record_probe_success(latency, self.clock.now())
                {
                    tracing::info!(server = %server.id, "Server recovered");
                    self.events.emit(ControlEvent::ServerRecovered {
                        id: server.id.clone(),
                    });
                }
            }
            Err(error) => {
                tracing::warn!(server = %server.id, address = %server.address(), error = %error, "Health check failed");
                if let Some(HealthTransition::Failed { error_rate }) =
                    server.record_probe_failure(self.config.failover_threshold)
                {
                    tracing::warn!(
                        server = %server.id,
                        error_rate,
                        threshold = self.config.failover_threshold,
                        "Server marked unhealthy"
                    );
                    self.events.emit(ControlEvent::ServerFailed {
                        id: server.id.clone(),
                        error_rate,
                    });
                }
            }
        }

        let healthy = server.is_healthy();
        metrics::record_backend_health(&server.id, healthy);
        healthy
    }

    async fn timed_probe(&self, server: &ServerInstance) -> Result<std::time::Duration, ProbeError> {
        let timeout = self.config.timeout();
        match time::timeout(timeout, self.probe.probe(server)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }

    fn breaker_for(&self, id: &str) -> Option<Arc<CircuitBreaker>> {
        let config = self.config.circuit_breaker.as_ref()?;
        let breaker = self
            .breakers
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    format!("health:{id}"),
                    config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone();
        Some(breaker)
    }

    fn prune_breakers(&self, servers: &[Arc<ServerInstance>]) {
        if self.breakers.is_empty() {
            return;
        }
        self.breakers
            .retain(|id, _| servers.iter().any(|server| &server.id == id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CircuitBreakerConfig, ServerConfig};
    use crate::load_balancer::ServerStatus;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Probe whose answer per server is set by the test.
    #[derive(Default)]
    struct ScriptedProbe {
        up: Mutex<HashMap<String, bool>>,
        calls: AtomicUsize,
        hang: Mutex<Option<String>>,
    }

    impl ScriptedProbe {
        fn set(&self, id: &str, up: bool) {
            self.up.lock().unwrap().insert(id.to_string(), up);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, server: &ServerInstance) -> Result<Duration, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hang = self.hang.lock().unwrap().as_deref() == Some(server.id.as_str());
            if hang {
                std::future::pending::<()>().await;
            }
            let up = self.up.lock().unwrap().get(&server.id).copied().unwrap_or(true);
            if up {
                Ok(Duration::from_millis(10))
            } else {
                Err(ProbeError::Status(503))
            }
        }
    }

    struct Fixture {
        registry: Arc<ServerRegistry>,
        probe: Arc<ScriptedProbe>,
        events: EventBus,
        checker: HealthChecker,
    }

    fn fixture(ids: &[&str], config: HealthCheckConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let events = EventBus::new();
        let registry = Arc::new(ServerRegistry::new(
            events.clone(),
            clock.clone(),
            Duration::from_secs(30),
        ));
        for (i, id) in ids.iter().enumerate() {
            registry
                .add(ServerConfig {
                    id: id.to_string(),
                    host: "127.0.0.1".into(),
                    port: 6000 + i as u16,
                    weight: 1,
                })
                .unwrap();
        }
        let probe = Arc::new(ScriptedProbe::default());
        let checker = HealthChecker::new(
            registry.clone(),
            probe.clone(),
            config,
            clock,
            events.clone(),
        )
        .unwrap();
        Fixture {
            registry,
            probe,
            events,
            checker,
        }
    }

    #[tokio::test]
    async fn test_failover_after_threshold_and_single_success_recovery() {
        let f = fixture(&["a", "b"], HealthCheckConfig::default());
        let mut rx = f.events.subscribe();
        f.probe.set("a", false);

        for round in 1..=3 {
            let summary = f.checker.check_all().await;
            let expected = if round < 3 { ServerStatus::Healthy } else { ServerStatus::Unhealthy };
            assert_eq!(f.registry.get("a").unwrap().status(), expected, "round {round}");
            assert_eq!(summary.checked, 2);
        }
        assert!(f.registry.get("b").unwrap().is_healthy());

        f.probe.set("a", true);
        let summary = f.checker.check_all().await;
        assert_eq!(summary.healthy, 2);
        assert!(f.registry.get("a").unwrap().is_healthy());

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names.iter().filter(|n| **n == "serverFailed").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "serverRecovered").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "healthCheckCompleted").count(), 4);
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let registry = Arc::new(ServerRegistry::new(
            EventBus::new(),
            Arc::new(ManualClock::new()),
            Duration::from_secs(30),
        ));
        let config = HealthCheckConfig {
            interval_secs: 0,
            ..Default::default()
        };
        let result = HealthChecker::new(
            registry,
            Arc::new(ScriptedProbe::default()),
            config,
            Arc::new(ManualClock::new()),
            EventBus::new(),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_draining_servers_not_probed() {
        let f = fixture(&["a", "b"], HealthCheckConfig::default());
        f.registry.remove("b");

        let summary = f.checker.check_all().await;
        assert_eq!(summary.checked, 1);
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_without_blocking_others() {
        let config = HealthCheckConfig {
            timeout_ms: 100,
            ..Default::default()
        };
        let f = fixture(&["a", "b"], config);
        *f.probe.hang.lock().unwrap() = Some("a".to_string());

        let summary = f.checker.check_all().await;
        assert_eq!(summary, RoundSummary { checked: 2, healthy: 2, unhealthy: 0 });
        assert_eq!(f.registry.get("a").unwrap().error_rate(), 1.0);
        assert_eq!(f.registry.get("b").unwrap().error_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_probe_breaker_skips_dead_server() {
        let config = HealthCheckConfig {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout_ms: 60_000,
            }),
            ..Default::default()
        };
        let f = fixture(&["a"], config);
        f.probe.set("a", false);

        for _ in 0..4 {
            f.checker.check_all().await;
        }
        // Two real probes opened the breaker; later rounds were rejected
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.registry.get("a").unwrap().status(), ServerStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(&["a"], HealthCheckConfig::default());
        let checker = Arc::new(f.checker);
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn({
            let checker = checker.clone();
            async move { checker.run(rx).await }
        });

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 2);

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
