//! Auto-scaler: periodic sampling, policy evaluation and scale actions.
//!
//! # Responsibilities
//! - Collect one sample per tick into the sliding window
//! - Ask the policy for a decision and enforce per-direction cooldowns
//! - Register new instances on scale-up, drain the least-loaded one on scale-down

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use crate::autoscale::collector::{CollectError, MetricsCollector};
use crate::autoscale::policy::{self, ScaleDecision};
use crate::autoscale::window::{MetricsWindow, ScalingMetrics};
use crate::clock::Clock;
use crate::config::validation::validate_autoscaling;
use crate::config::{AutoScalingConfig, ConfigError, ServerConfig};
use crate::events::{ControlEvent, EventBus, ScalingReport};
use crate::load_balancer::ServerRegistry;
use crate::observability::metrics;

#[derive(Debug)]
struct ScalerState {
    window: MetricsWindow,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    next_ordinal: u16,
}

pub struct AutoScaler {
    registry: Arc<ServerRegistry>,
    collector: Arc<dyn MetricsCollector>,
    config: AutoScalingConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<ScalerState>,
}

impl AutoScaler {
    /// Create a scaler, rejecting invalid settings.
    pub fn new(
        registry: Arc<ServerRegistry>,
        collector: Arc<dyn MetricsCollector>,
        config: AutoScalingConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        validate_autoscaling(&config).map_err(ConfigError::Validation)?;
        let state = ScalerState {
            window: MetricsWindow::new(config.metrics_window()),
            last_scale_up: None,
            last_scale_down: None,
            next_ordinal: 0,
        };
        Ok(Self {
            registry,
            collector,
            config,
            clock,
            events,
            state: Mutex::new(state),
        })
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Auto-scaling disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            min = self.config.min_instances,
            max = self.config.max_instances,
            target_cpu = self.config.target_cpu_utilization,
            target_memory = self.config.target_memory_utilization,
            "Auto-scaler starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "Skipping scaling round");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Auto-scaler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Collect one sample and act on it.
    ///
    /// Returns the action actually taken; a decision blocked by its cooldown
    /// comes back as `NoChange`.
    pub async fn tick(&self) -> Result<ScaleDecision, CollectError> {
        let timeout = self.config.collection_timeout();
        let usage = match time::timeout(timeout, self.collector.collect()).await {
            Ok(result) => result?,
            Err(_) => return Err(CollectError::Timeout(timeout)),
        };

        let now = self.clock.now();
        let instances = self.registry.active_count();
        metrics::record_instances(instances);

        let mut state = self.lock();
        state.window.push(ScalingMetrics {
            current_instances: instances,
            cpu_utilization: usage.cpu_utilization,
            memory_utilization: usage.memory_utilization,
            requests_per_second: usage.requests_per_second,
            average_response_time_ms: usage.average_response_time_ms,
            timestamp: now,
        });

        let decision = policy::evaluate(&state.window, instances, &self.config);
        tracing::debug!(
            instances,
            cpu = usage.cpu_utilization,
            memory = usage.memory_utilization,
            samples = state.window.len(),
            decision = ?decision,
            "Scaling evaluated"
        );

        match decision {
            ScaleDecision::ScaleUp => {
                if cooling_down(state.last_scale_up, now, self.config.scale_up_cooldown()) {
                    tracing::debug!("Scale-up suppressed by cooldown");
                    return Ok(ScaleDecision::NoChange);
                }
                if !self.scale_up(&mut state) {
                    return Ok(ScaleDecision::NoChange);
                }
                state.last_scale_up = Some(now);
            }
            ScaleDecision::ScaleDown => {
                if cooling_down(state.last_scale_down, now, self.config.scale_down_cooldown()) {
                    tracing::debug!("Scale-down suppressed by cooldown");
                    return Ok(ScaleDecision::NoChange);
                }
                if !self.scale_down() {
                    return Ok(ScaleDecision::NoChange);
                }
                state.last_scale_down = Some(now);
            }
            ScaleDecision::NoChange => {}
        }

        Ok(decision)
    }

    fn scale_up(&self, state: &mut ScalerState) -> bool {
        let template = &self.config.template;
        let Some(port) = template.base_port.checked_add(state.next_ordinal) else {
            tracing::warn!(base_port = template.base_port, "No ports left for new instances");
            return false;
        };

        let suffix = Uuid::new_v4().simple().to_string();
        let config = ServerConfig {
            id: format!("{}-{}", template.id_prefix, &suffix[..8]),
            host: template.host.clone(),
            port,
            weight: template.weight,
        };

        match self.registry.add(config) {
            Ok(server) => {
                state.next_ordinal = state.next_ordinal.saturating_add(1);
                let instances = self.registry.active_count();
                tracing::info!(server = %server.id, address = %server.address(), instances, "Scaled up");
                metrics::record_scaling_action("up");
                metrics::record_instances(instances);
                self.events.emit(ControlEvent::InstanceAdded {
                    id: server.id.clone(),
                    instances,
                });
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register new instance");
                false
            }
        }
    }

    /// Drain the healthy instance with the fewest connections, newest first on ties.
    fn scale_down(&self) -> bool {
        let healthy = self.registry.healthy();
        let Some(victim) = healthy.iter().rev().min_by_key(|s| s.current_connections()) else {
            tracing::debug!("No healthy instance to scale down");
            return false;
        };
        if !self.registry.remove(&victim.id) {
            return false;
        }

        let instances = self.registry.active_count();
        tracing::info!(
            server = %victim.id,
            connections = victim.current_connections(),
            instances,
            "Scaled down"
        );
        metrics::record_scaling_action("down");
        metrics::record_instances(instances);
        self.events.emit(ControlEvent::InstanceRemoved {
            id: victim.id.clone(),
            instances,
        });
        true
    }

    pub fn report(&self) -> ScalingReport {
        let now = self.clock.now();
        let state = self.lock();
        let since = |at: Option<Instant>| at.map(|t| now.duration_since(t).as_secs_f64());

        ScalingReport {
            enabled: self.config.enabled,
            current_instances: self.registry.active_count(),
            min_instances: self.config.min_instances,
            max_instances: self.config.max_instances,
            samples: state.window.len(),
            mean_cpu_utilization: state.window.mean(|m| m.cpu_utilization),
            mean_memory_utilization: state.window.mean(|m| m.memory_utilization),
            mean_requests_per_second: state.window.mean(|m| m.requests_per_second),
            secs_since_scale_up: since(state.last_scale_up),
            secs_since_scale_down: since(state.last_scale_down),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScalerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cooling_down(last: Option<Instant>, now: Instant, cooldown: std::time::Duration) -> bool {
    last.is_some_and(|at| now.duration_since(at) < cooldown)
}
