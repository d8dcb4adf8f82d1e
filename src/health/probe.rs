//! Health probes.
//!
//! A probe answers one question: did the server's health endpoint respond
//! with 2xx, and how long did it take. Timeouts are enforced by the caller.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::load_balancer::ServerInstance;

/// Why a probe did not count as a success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("health endpoint returned status {0}")]
    Status(u16),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid health check request: {0}")]
    Request(String),

    #[error("probe skipped: circuit breaker open")]
    CircuitOpen,
}

/// Checks a single server.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe `server`, returning the observed response time on success.
    async fn probe(&self, server: &ServerInstance) -> Result<Duration, ProbeError>;
}

/// HTTP GET against `http://{host}:{port}{path}`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            path: path.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, server: &ServerInstance) -> Result<Duration, ProbeError> {
        let url = server
            .health_url(&self.path)
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("user-agent", "fleet-balancer-health-check")
            .body(Body::empty())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let started = Instant::now();
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;
        let elapsed = started.elapsed();

        let status = response.status();
        if status.is_success() {
            Ok(elapsed)
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}
