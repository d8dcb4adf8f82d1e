//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic, including unknown algorithms)
//! - Validate value ranges (intervals > 0, thresholds in range, min <= max)
//! - Detect duplicate server IDs in the initial fleet
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControlPlaneConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, and again on runtime updates

use std::collections::HashSet;

use crate::config::schema::{
    AutoScalingConfig, BalancerConfig, CircuitBreakerConfig, ControlPlaneConfig,
    HealthCheckConfig, ServerConfig,
};

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("min_instances ({min}) exceeds max_instances ({max})")]
    MinExceedsMax { min: usize, max: usize },

    #[error("metrics window of {window_secs}s cannot hold 3 samples taken every {interval_secs}s")]
    WindowTooShort { window_secs: u64, interval_secs: u64 },

    #[error("duplicate server id: {0}")]
    DuplicateServer(String),

    #[error("server {id}: {reason}")]
    InvalidServer { id: String, reason: &'static str },
}

/// Validate a full configuration, collecting every error.
pub fn validate_config(config: &ControlPlaneConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    errors.extend(balancer_errors(&config.balancer));
    errors.extend(health_check_errors(&config.health_check));
    errors.extend(autoscaling_errors(&config.autoscaling));
    errors.extend(breaker_errors(&config.circuit_breaker));

    if config.drain.reap_interval_ms == 0 {
        errors.push(ValidationError::Zero { field: "drain.reap_interval_ms" });
    }

    let mut seen = HashSet::new();
    for server in &config.servers {
        if !seen.insert(server.id.as_str()) {
            errors.push(ValidationError::DuplicateServer(server.id.clone()));
        }
        errors.extend(server_errors(server));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the selection settings alone (used for runtime updates).
pub fn validate_balancer(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let errors = balancer_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the health check settings alone.
pub fn validate_health_check(config: &HealthCheckConfig) -> Result<(), Vec<ValidationError>> {
    let errors = health_check_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the auto-scaling settings alone.
pub fn validate_autoscaling(config: &AutoScalingConfig) -> Result<(), Vec<ValidationError>> {
    let errors = autoscaling_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a server definition before registration.
pub fn validate_server(server: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let errors = server_errors(server);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn balancer_errors(config: &BalancerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.enable_sticky_sessions && config.session_affinity_ttl_secs == 0 {
        errors.push(ValidationError::Zero { field: "balancer.session_affinity_ttl_secs" });
    }
    errors
}

fn health_check_errors(config: &HealthCheckConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "health_check.interval_secs" });
    }
    if config.timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "health_check.timeout_ms" });
    }
    check_range(
        &mut errors,
        "health_check.failover_threshold",
        config.failover_threshold,
        f64::MIN_POSITIVE,
        100.0,
    );
    if let Some(breaker) = &config.circuit_breaker {
        errors.extend(breaker_errors(breaker));
    }
    errors
}

fn autoscaling_errors(config: &AutoScalingConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.max_instances == 0 {
        errors.push(ValidationError::Zero { field: "autoscaling.max_instances" });
    }
    if config.min_instances > config.max_instances {
        errors.push(ValidationError::MinExceedsMax {
            min: config.min_instances,
            max: config.max_instances,
        });
    }
    if config.interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "autoscaling.interval_secs" });
    } else if config.metrics_window_secs < config.interval_secs * 3 {
        errors.push(ValidationError::WindowTooShort {
            window_secs: config.metrics_window_secs,
            interval_secs: config.interval_secs,
        });
    }
    if config.collection_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "autoscaling.collection_timeout_ms" });
    }
    check_range(
        &mut errors,
        "autoscaling.target_cpu_utilization",
        config.target_cpu_utilization,
        f64::MIN_POSITIVE,
        100.0,
    );
    check_range(
        &mut errors,
        "autoscaling.target_memory_utilization",
        config.target_memory_utilization,
        f64::MIN_POSITIVE,
        100.0,
    );
    if config.connections_per_instance == 0 {
        errors.push(ValidationError::Zero { field: "autoscaling.connections_per_instance" });
    }
    if config.template.weight == 0 {
        errors.push(ValidationError::Zero { field: "autoscaling.template.weight" });
    }
    errors
}

fn breaker_errors(config: &CircuitBreakerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.failure_threshold == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.failure_threshold" });
    }
    errors
}

fn server_errors(server: &ServerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if server.id.trim().is_empty() {
        errors.push(ValidationError::InvalidServer {
            id: server.id.clone(),
            reason: "id must not be empty",
        });
    }
    if server.host.trim().is_empty() {
        errors.push(ValidationError::InvalidServer {
            id: server.id.clone(),
            reason: "host must not be empty",
        });
    }
    if server.port == 0 {
        errors.push(ValidationError::InvalidServer {
            id: server.id.clone(),
            reason: "port must not be zero",
        });
    }
    if server.weight == 0 {
        errors.push(ValidationError::InvalidServer {
            id: server.id.clone(),
            reason: "weight must be at least 1",
        });
    }
    errors
}

fn check_range(errors: &mut Vec<ValidationError>, field: &'static str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        errors.push(ValidationError::OutOfRange { field, min, max, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            weight: 1,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ControlPlaneConfig::default()).is_ok());
    }

    #[test]
    fn test_min_exceeds_max() {
        let mut config = ControlPlaneConfig::default();
        config.autoscaling.min_instances = 5;
        config.autoscaling.max_instances = 2;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::MinExceedsMax { min: 5, max: 2 }));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ControlPlaneConfig::default();
        config.health_check.interval_secs = 0;
        config.health_check.timeout_ms = 0;
        config.servers = vec![server("a"), server("a")];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::DuplicateServer("a".to_string())));
    }

    #[test]
    fn test_window_must_hold_three_samples() {
        let mut config = ControlPlaneConfig::default();
        config.autoscaling.interval_secs = 60;
        config.autoscaling.metrics_window_secs = 120;

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::WindowTooShort { .. }));
    }

    #[test]
    fn test_sticky_sessions_need_ttl() {
        let config = BalancerConfig {
            enable_sticky_sessions: true,
            session_affinity_ttl_secs: 0,
            ..Default::default()
        };
        assert!(validate_balancer(&config).is_err());
    }

    #[test]
    fn test_server_weight_zero() {
        let mut s = server("a");
        s.weight = 0;
        assert!(validate_server(&s).is_err());
    }
}
