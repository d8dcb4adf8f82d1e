//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the control
//! plane. All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Selection algorithm and session affinity.
    pub balancer: BalancerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Auto-scaling settings.
    pub autoscaling: AutoScalingConfig,

    /// Settings for breakers handed out by `ControlPlane::circuit_breaker`.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Drain and shutdown windows.
    pub drain: DrainConfig,

    /// Initial fleet registered at startup.
    pub servers: Vec<ServerConfig>,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Load balancing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
    IpHash,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round-robin",
            Algorithm::LeastConnections => "least-connections",
            Algorithm::Weighted => "weighted",
            Algorithm::IpHash => "ip-hash",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown load balancing algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Algorithm::RoundRobin),
            "least-connections" => Ok(Algorithm::LeastConnections),
            "weighted" => Ok(Algorithm::Weighted),
            "ip-hash" => Ok(Algorithm::IpHash),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Selection engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection algorithm.
    pub algorithm: Algorithm,

    /// Bind sessions to the server that first handled them.
    pub enable_sticky_sessions: bool,

    /// Session affinity lifetime in seconds.
    pub session_affinity_ttl_secs: u64,
}

impl BalancerConfig {
    pub fn session_affinity_ttl(&self) -> Duration {
        Duration::from_secs(self.session_affinity_ttl_secs)
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            enable_sticky_sessions: false,
            session_affinity_ttl_secs: 3600,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Error rate at which a healthy server is failed over.
    pub failover_threshold: f64,

    /// Optional breaker wrapped around each server's probe.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_ms: 5_000,
            path: "/health".to_string(),
            failover_threshold: 3.0,
            circuit_breaker: None,
        }
    }
}

/// Template for instances created by scale-up.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstanceTemplate {
    /// Prefix for generated instance IDs.
    pub id_prefix: String,

    /// Host new instances listen on.
    pub host: String,

    /// First port handed out; each new instance takes the next one.
    pub base_port: u16,

    /// Weight assigned to new instances.
    pub weight: u32,
}

impl Default for InstanceTemplate {
    fn default() -> Self {
        Self {
            id_prefix: "auto".to_string(),
            host: "127.0.0.1".to_string(),
            base_port: 3100,
            weight: 1,
        }
    }
}

/// Auto-scaling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoScalingConfig {
    /// Run the scaling loop.
    pub enabled: bool,

    /// Evaluation interval in seconds.
    pub interval_secs: u64,

    pub min_instances: usize,
    pub max_instances: usize,

    /// Target CPU utilization in percent.
    pub target_cpu_utilization: f64,

    /// Target memory utilization in percent.
    pub target_memory_utilization: f64,

    pub scale_up_cooldown_secs: u64,
    pub scale_down_cooldown_secs: u64,

    /// Sliding metrics window in seconds.
    pub metrics_window_secs: u64,

    /// Bound on a single metrics collection, in milliseconds.
    pub collection_timeout_ms: u64,

    /// Where utilization samples come from.
    pub collector: CollectorKind,

    /// Connections one instance handles at 100% utilization.
    pub connections_per_instance: usize,

    pub template: InstanceTemplate,
}

/// Source of utilization samples for the auto-scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    /// Estimate load from registry connection and request counters.
    #[default]
    Registry,
    /// Synthetic load, for demos and soak tests.
    Simulated,
}

impl AutoScalingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn scale_up_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_up_cooldown_secs)
    }

    pub fn scale_down_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_down_cooldown_secs)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }

    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
            min_instances: 2,
            max_instances: 10,
            target_cpu_utilization: 70.0,
            target_memory_utilization: 80.0,
            scale_up_cooldown_secs: 300,
            scale_down_cooldown_secs: 600,
            metrics_window_secs: 300,
            collection_timeout_ms: 5_000,
            collector: CollectorKind::default(),
            connections_per_instance: 100,
            template: InstanceTemplate::default(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,

    /// Time an open breaker waits before allowing a trial call, in milliseconds.
    pub recovery_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

/// Drain windows for removal and shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Grace period before a removed server is deleted, in seconds.
    pub grace_period_secs: u64,

    /// How often drained servers and expired sessions are reaped, in milliseconds.
    pub reap_interval_ms: u64,

    /// Upper bound on waiting for connections during shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl DrainConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
            reap_interval_ms: 1_000,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Backend server definition.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Unique server identifier.
    pub id: String,

    pub host: String,

    pub port: u16,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("ip-hash".parse::<Algorithm>().unwrap(), Algorithm::IpHash);
        assert_eq!(
            "least-connections".parse::<Algorithm>().unwrap(),
            Algorithm::LeastConnections
        );
        assert!("random".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_minimal_toml() {
        let config: ControlPlaneConfig = toml::from_str(
            r#"
            [balancer]
            algorithm = "weighted"
            enable_sticky_sessions = true

            [[servers]]
            id = "a"
            host = "10.0.0.1"
            port = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.balancer.algorithm, Algorithm::Weighted);
        assert!(config.balancer.enable_sticky_sessions);
        assert_eq!(config.servers[0].weight, 1);
        assert_eq!(config.health_check.interval_secs, 30);
        assert_eq!(config.autoscaling.metrics_window_secs, 300);
    }

    #[test]
    fn test_unknown_algorithm_rejected_by_serde() {
        let result: Result<ControlPlaneConfig, _> = toml::from_str(
            r#"
            [balancer]
            algorithm = "fastest"
            "#,
        );
        assert!(result.is_err());
    }
}
