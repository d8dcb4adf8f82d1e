//! Admin API.
//!
//! JSON over HTTP for the registration API and the health and scaling
//! reports. `fleetctl` is its command-line client.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::handlers::*;
use crate::lifecycle::ControlPlane;

#[allow(deprecated)]
pub fn setup_admin_router(plane: Arc<ControlPlane>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/servers", get(list_servers).post(add_server))
        .route("/admin/servers/{id}", delete(remove_server))
        .route("/admin/servers/{id}/weight", put(update_weight))
        .route("/admin/servers/{id}/connections", post(track_connection))
        .route("/admin/health", get(get_health))
        .route("/admin/scaling", get(get_scaling))
        .route("/admin/select", get(select_server))
        .with_state(plane)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
