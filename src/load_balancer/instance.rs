//! Server instance abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for Least Connections LB)
//! - Track health state (Healthy/Unhealthy/Draining) and probe statistics

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use url::Url;

use crate::config::ServerConfig;
use crate::health::state::{self, HealthTransition};

/// Server status.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Healthy = 0,
    Unhealthy = 1,
    Draining = 2,
}

impl From<u8> for ServerStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => ServerStatus::Healthy,
            1 => ServerStatus::Unhealthy,
            _ => ServerStatus::Draining,
        }
    }
}

/// Probe statistics, updated together under one short lock.
#[derive(Debug, Default)]
struct ProbeStats {
    average_response_time_ms: Option<f64>,
    error_rate: f64,
    last_health_check: Option<Instant>,
    drain_deadline: Option<Instant>,
}

/// A single backend server.
#[derive(Debug)]
pub struct ServerInstance {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Pre-calculated base URL for probes.
    pub base_url: Url,

    weight: AtomicU32,
    status: AtomicU8,
    current_connections: AtomicUsize,
    total_requests: AtomicU64,
    stats: Mutex<ProbeStats>,
}

impl ServerInstance {
    /// Create a new healthy instance with zeroed counters.
    pub fn new(config: &ServerConfig) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(&format!("http://{}:{}", config.host, config.port))?;
        Ok(Self {
            id: config.id.clone(),
            host: config.host.clone(),
            port: config.port,
            base_url,
            weight: AtomicU32::new(config.weight),
            status: AtomicU8::new(ServerStatus::Healthy as u8),
            current_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            stats: Mutex::new(ProbeStats::default()),
        })
    }

    /// URL of the health endpoint at `path`.
    pub fn health_url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == ServerStatus::Healthy
    }

    pub fn is_draining(&self) -> bool {
        self.status() == ServerStatus::Draining
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub(crate) fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Relaxed);
    }

    pub fn current_connections(&self) -> usize {
        self.current_connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn error_rate(&self) -> f64 {
        self.stats().error_rate
    }

    pub fn average_response_time(&self) -> Option<Duration> {
        self.stats()
            .average_response_time_ms
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    pub fn last_health_check(&self) -> Option<Instant> {
        self.stats().last_health_check
    }

    pub(crate) fn drain_deadline(&self) -> Option<Instant> {
        self.stats().drain_deadline
    }

    /// Increment active connection count and the request counter.
    pub fn inc_connections(&self) {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count, never below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .current_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Open a tracked connection that is released when the guard drops.
    pub fn connect(self: &Arc<Self>) -> ConnectionGuard {
        self.inc_connections();
        ConnectionGuard {
            server: self.clone(),
        }
    }

    // --- Health Logic ---

    /// Record a successful probe.
    ///
    /// Returns `Recovered` if this flipped the server from unhealthy to healthy.
    pub fn record_probe_success(&self, latency: Duration, now: Instant) -> Option<HealthTransition> {
        let mut stats = self.stats();
        stats.last_health_check = Some(now);
        stats.average_response_time_ms = Some(state::ema(
            stats.average_response_time_ms,
            latency.as_secs_f64() * 1000.0,
        ));
        stats.error_rate = state::decay_error_rate(stats.error_rate);

        self.transition(ServerStatus::Unhealthy, ServerStatus::Healthy)
            .then_some(HealthTransition::Recovered)
    }

    /// Record a failed or timed-out probe.
    ///
    /// Returns `Failed` if this flipped the server from healthy to unhealthy.
    pub fn record_probe_failure(&self, failover_threshold: f64) -> Option<HealthTransition> {
        let mut stats = self.stats();
        stats.error_rate = state::bump_error_rate(stats.error_rate);

        if stats.error_rate >= failover_threshold
            && self.transition(ServerStatus::Healthy, ServerStatus::Unhealthy)
        {
            return Some(HealthTransition::Failed {
                error_rate: stats.error_rate,
            });
        }
        None
    }

    /// Stop routing to this server. Returns false if it was already draining.
    pub(crate) fn begin_drain(&self, deadline: Instant) -> bool {
        let mut stats = self.stats();
        let previous = self.status.swap(ServerStatus::Draining as u8, Ordering::AcqRel);
        if ServerStatus::from(previous) == ServerStatus::Draining {
            return false;
        }
        stats.drain_deadline = Some(deadline);
        true
    }

    fn transition(&self, from: ServerStatus, to: ServerStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn stats(&self) -> MutexGuard<'_, ProbeStats> {
        // Stats are plain numbers; a panic mid-update leaves them usable.
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    pub server: Arc<ServerInstance>,
}

impl Deref for ConnectionGuard {
    type Target = ServerInstance;
    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.server.dec_connections();
    }
}
