//! Event bus for control plane state changes.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default buffer of undelivered events per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// A state change emitted by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ControlEvent {
    /// A server was registered.
    ServerAdded { id: String },
    /// A server stopped receiving new traffic and is waiting out its grace period.
    ServerDraining { id: String },
    /// A drained server was deleted from the registry.
    ServerRemoved { id: String },
    /// A healthy server crossed the failover threshold.
    ServerFailed { id: String, error_rate: f64 },
    /// An unhealthy server passed a probe.
    ServerRecovered { id: String },
    /// Scale-up registered a new instance.
    InstanceAdded { id: String, instances: usize },
    /// Scale-down started draining an instance.
    InstanceRemoved { id: String, instances: usize },
    /// A health check round finished.
    HealthCheckCompleted {
        checked: usize,
        healthy: usize,
        unhealthy: usize,
        duration_ms: u64,
    },
}

impl ControlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::ServerAdded { .. } => "serverAdded",
            ControlEvent::ServerDraining { .. } => "serverDraining",
            ControlEvent::ServerRemoved { .. } => "serverRemoved",
            ControlEvent::ServerFailed { .. } => "serverFailed",
            ControlEvent::ServerRecovered { .. } => "serverRecovered",
            ControlEvent::InstanceAdded { .. } => "instanceAdded",
            ControlEvent::InstanceRemoved { .. } => "instanceRemoved",
            ControlEvent::HealthCheckCompleted { .. } => "healthCheckCompleted",
        }
    }
}

/// Fan-out channel for [`ControlEvent`]s.
///
/// Emitting never blocks and never fails; events sent with no subscribers
/// are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: ControlEvent) {
        tracing::trace!(event = event.name(), "Emitting control event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Default consumer: writes every event to the log until shutdown.
pub async fn log_events(
    mut events: broadcast::Receiver<ControlEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Event logger stopped");
}

fn log_event(event: &ControlEvent) {
    match event {
        ControlEvent::ServerFailed { id, error_rate } => {
            tracing::warn!(event = event.name(), server = %id, error_rate, "Server failed");
        }
        ControlEvent::HealthCheckCompleted { checked, healthy, unhealthy, duration_ms } => {
            tracing::debug!(
                event = event.name(),
                checked,
                healthy,
                unhealthy,
                duration_ms,
                "Health check round completed"
            );
        }
        other => match serde_json::to_string(other) {
            Ok(json) => tracing::info!(event = other.name(), payload = %json, "Control event"),
            Err(_) => tracing::info!(event = other.name(), "Control event"),
        },
    }
}
