//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use fleet_balancer::autoscale::{CollectError, MetricsCollector, ResourceUsage};
use fleet_balancer::config::ServerConfig;
use fleet_balancer::health::{HealthProbe, ProbeError};
use fleet_balancer::ServerInstance;

/// Handle to a mock backend whose health answer can be changed on the fly.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    status: Arc<AtomicU16>,
    hang: Arc<AtomicBool>,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// Accept connections but never answer.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn server_config(&self, id: &str) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            weight: 1,
        }
    }
}

/// Start a mock backend on an ephemeral port answering every request with the current status.
pub async fn start_mock_backend() -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        status: Arc::new(AtomicU16::new(200)),
        hang: Arc::new(AtomicBool::new(false)),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let handle = backend.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                handle.hits.fetch_add(1, Ordering::SeqCst);

                if handle.hang.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return;
                }

                let status = handle.status.load(Ordering::SeqCst);
                let status_text = match status {
                    200 => "200 OK",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let body = if status == 200 { "ok" } else { "down" };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    backend
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct AlwaysUp;

#[async_trait]
impl HealthProbe for AlwaysUp {
    async fn probe(&self, _server: &ServerInstance) -> Result<Duration, ProbeError> {
        Ok(Duration::from_millis(2))
    }
}

/// Collector reporting whatever load the test sets.
#[derive(Default)]
pub struct FixedLoad {
    cpu: std::sync::Mutex<(f64, f64)>,
}

impl FixedLoad {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            cpu: std::sync::Mutex::new((cpu, memory)),
        }
    }

    pub fn set(&self, cpu: f64, memory: f64) {
        *self.cpu.lock().unwrap() = (cpu, memory);
    }
}

#[async_trait]
impl MetricsCollector for FixedLoad {
    async fn collect(&self) -> Result<ResourceUsage, CollectError> {
        let (cpu, memory) = *self.cpu.lock().unwrap();
        Ok(ResourceUsage {
            cpu_utilization: cpu,
            memory_utilization: memory,
            requests_per_second: 100.0,
            average_response_time_ms: 20.0,
        })
    }
}
