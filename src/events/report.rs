//! Health and scaling summaries.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::load_balancer::{ServerInstance, ServerRegistry, ServerStatus};

/// Point-in-time view of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerReport {
    pub id: String,
    pub address: String,
    pub weight: u32,
    pub status: ServerStatus,
    pub current_connections: usize,
    pub total_requests: u64,
    pub average_response_time_ms: Option<f64>,
    pub error_rate: f64,
    /// Seconds since the last successful probe.
    pub last_health_check_secs: Option<f64>,
}

impl ServerReport {
    pub fn from_instance(server: &ServerInstance, now: Instant) -> Self {
        Self {
            id: server.id.clone(),
            address: server.address(),
            weight: server.weight(),
            status: server.status(),
            current_connections: server.current_connections(),
            total_requests: server.total_requests(),
            average_response_time_ms: server
                .average_response_time()
                .map(|d| d.as_secs_f64() * 1000.0),
            error_rate: server.error_rate(),
            last_health_check_secs: server
                .last_health_check()
                .map(|t| now.duration_since(t).as_secs_f64()),
        }
    }
}

/// Fleet health summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub draining: usize,
    pub total_connections: usize,
    pub total_requests: u64,
    pub servers: Vec<ServerReport>,
}

impl HealthReport {
    pub fn from_registry(registry: &ServerRegistry, now: Instant) -> Self {
        let servers: Vec<ServerReport> = registry
            .all()
            .iter()
            .map(|s| ServerReport::from_instance(s, now))
            .collect();
        let count = |status: ServerStatus| servers.iter().filter(|s| s.status == status).count();

        Self {
            total: servers.len(),
            healthy: count(ServerStatus::Healthy),
            unhealthy: count(ServerStatus::Unhealthy),
            draining: count(ServerStatus::Draining),
            total_connections: servers.iter().map(|s| s.current_connections).sum(),
            total_requests: servers.iter().map(|s| s.total_requests).sum(),
            servers,
        }
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "servers: {} total, {} healthy, {} unhealthy, {} draining",
            self.total, self.healthy, self.unhealthy, self.draining
        )?;
        writeln!(
            f,
            "connections: {}  requests: {}",
            self.total_connections, self.total_requests
        )?;
        writeln!(
            f,
            "{:<20} {:<22} {:<10} {:>6} {:>6} {:>10} {:>10} {:>8}",
            "ID", "ADDRESS", "STATUS", "WEIGHT", "CONNS", "REQUESTS", "AVG_MS", "ERRORS"
        )?;
        for s in &self.servers {
            let status = match s.status {
                ServerStatus::Healthy => "healthy",
                ServerStatus::Unhealthy => "unhealthy",
                ServerStatus::Draining => "draining",
            };
            let avg = s
                .average_response_time_ms
                .map(|ms| format!("{ms:.1}"))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{:<20} {:<22} {:<10} {:>6} {:>6} {:>10} {:>10} {:>8.1}",
                s.id, s.address, status, s.weight, s.current_connections, s.total_requests, avg, s.error_rate
            )?;
        }
        Ok(())
    }
}

/// Auto-scaler summary over the current metrics window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingReport {
    pub enabled: bool,
    pub current_instances: usize,
    pub min_instances: usize,
    pub max_instances: usize,
    pub samples: usize,
    pub mean_cpu_utilization: Option<f64>,
    pub mean_memory_utilization: Option<f64>,
    pub mean_requests_per_second: Option<f64>,
    pub secs_since_scale_up: Option<f64>,
    pub secs_since_scale_down: Option<f64>,
}

impl fmt::Display for ScalingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = |v: Option<f64>| v.map(|v| format!("{v:.1}%")).unwrap_or_else(|| "-".into());
        let secs = |v: Option<f64>| v.map(|v| format!("{v:.0}s ago")).unwrap_or_else(|| "never".into());

        writeln!(
            f,
            "autoscaling: {}  instances: {} (min {}, max {})",
            if self.enabled { "enabled" } else { "disabled" },
            self.current_instances,
            self.min_instances,
            self.max_instances
        )?;
        writeln!(
            f,
            "window: {} samples  cpu: {}  memory: {}  rps: {}",
            self.samples,
            pct(self.mean_cpu_utilization),
            pct(self.mean_memory_utilization),
            self.mean_requests_per_second
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "-".into())
        )?;
        writeln!(
            f,
            "last scale-up: {}  last scale-down: {}",
            secs(self.secs_since_scale_up),
            secs(self.secs_since_scale_down)
        )
    }
}
