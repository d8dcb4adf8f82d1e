//! Utilization collectors.
//!
//! The auto-scaler only sees the [`MetricsCollector`] trait. Two collectors
//! ship with the crate:
//! - [`RegistryMetricsCollector`]: derives load from registry counters
//! - [`SimulatedCollector`]: synthetic load for demos and soak tests

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::clock::Clock;
use crate::load_balancer::ServerRegistry;

/// One raw reading, before it is stamped into a window sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub requests_per_second: f64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("metrics collection timed out after {0:?}")]
    Timeout(Duration),

    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
}

/// A source of utilization readings.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn collect(&self) -> Result<ResourceUsage, CollectError>;
}

/// Share of memory utilization that tracks connection load.
const MEMORY_LOAD_SHARE: f64 = 0.6;

/// Baseline memory utilization of an idle instance, in percent.
const MEMORY_BASELINE: f64 = 20.0;

/// Estimates utilization from what the registry already tracks.
///
/// CPU is connection saturation against `connections_per_instance`. Memory is
/// a fixed baseline plus a share of that saturation. Throughput is the delta
/// of `total_requests` between two collections.
pub struct RegistryMetricsCollector {
    registry: Arc<ServerRegistry>,
    clock: Arc<dyn Clock>,
    connections_per_instance: usize,
    last: Mutex<Option<(Instant, u64)>>,
}

impl RegistryMetricsCollector {
    pub fn new(
        registry: Arc<ServerRegistry>,
        clock: Arc<dyn Clock>,
        connections_per_instance: usize,
    ) -> Self {
        Self {
            registry,
            clock,
            connections_per_instance: connections_per_instance.max(1),
            last: Mutex::new(None),
        }
    }

    fn requests_per_second(&self, now: Instant, total: u64) -> f64 {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let rate = match *last {
            Some((at, previous)) => {
                let elapsed = now.duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    total.saturating_sub(previous) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, total));
        rate
    }
}

#[async_trait]
impl MetricsCollector for RegistryMetricsCollector {
    async fn collect(&self) -> Result<ResourceUsage, CollectError> {
        let servers = self.registry.all();
        let active: Vec<_> = servers.iter().filter(|s| !s.is_draining()).collect();

        let now = self.clock.now();
        let total_requests: u64 = servers.iter().map(|s| s.total_requests()).sum();
        let requests_per_second = self.requests_per_second(now, total_requests);

        if active.is_empty() {
            return Ok(ResourceUsage {
                requests_per_second,
                ..Default::default()
            });
        }

        let connections: usize = active.iter().map(|s| s.current_connections()).sum();
        let capacity = (active.len() * self.connections_per_instance) as f64;
        let saturation = (connections as f64 / capacity * 100.0).min(100.0);

        let latencies: Vec<f64> = active
            .iter()
            .filter_map(|s| s.average_response_time())
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let average_response_time_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Ok(ResourceUsage {
            cpu_utilization: saturation,
            memory_utilization: (MEMORY_BASELINE + saturation * MEMORY_LOAD_SHARE).min(100.0),
            requests_per_second,
            average_response_time_ms,
        })
    }
}

/// Random load between fixed bounds.
#[derive(Debug, Clone)]
pub struct SimulatedCollector {
    cpu: (f64, f64),
    memory: (f64, f64),
}

impl SimulatedCollector {
    pub fn new(cpu: (f64, f64), memory: (f64, f64)) -> Self {
        Self { cpu, memory }
    }

    fn between((low, high): (f64, f64)) -> f64 {
        low + fastrand::f64() * (high - low)
    }
}

impl Default for SimulatedCollector {
    fn default() -> Self {
        Self::new((20.0, 80.0), (30.0, 70.0))
    }
}

#[async_trait]
impl MetricsCollector for SimulatedCollector {
    async fn collect(&self) -> Result<ResourceUsage, CollectError> {
        Ok(ResourceUsage {
            cpu_utilization: Self::between(self.cpu),
            memory_utilization: Self::between(self.memory),
            requests_per_second: Self::between((50.0, 500.0)),
            average_response_time_ms: Self::between((10.0, 200.0)),
        })
    }
}
