//! Fleet balancer control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  CONTROL PLANE                   │
//!                      │                                                  │
//!   select_server ─────┼─▶ SelectionEngine ──▶ ServerRegistry (snapshot)  │
//!   track_connection ──┼─────────────────────▶ ServerInstance counters    │
//!                      │                            ▲        ▲            │
//!                      │       HealthChecker ───────┘        │            │
//!                      │   (probes, breakers)                │            │
//!                      │                                     │            │
//!                      │       AutoScaler ───────────────────┘            │
//!                      │   (window, policy, cooldowns)                    │
//!                      │                                                  │
//!                      │   EventBus ──▶ event logger, subscribers         │
//!                      └──────────────────────────────────────────────────┘
//!                                  ▲
//!   fleetctl ── HTTP ── admin API ─┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use fleet_balancer::admin;
use fleet_balancer::config::{load_config, watcher::ConfigWatcher, ControlPlaneConfig};
use fleet_balancer::lifecycle::{shutdown_signal, ControlPlane};
use fleet_balancer::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "fleet-balancer")]
#[command(about = "Load-balancing and auto-scaling control plane", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ControlPlaneConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fleet-balancer starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let plane = Arc::new(ControlPlane::new(config.clone())?);
    plane.start();

    // Keeps the notify watcher alive for the lifetime of main
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let _ = plane.watch_config_updates(updates);
            Some(handle)
        }
        _ => None,
    };

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = admin::setup_admin_router(
            plane.clone(),
            Duration::from_secs(config.admin.request_timeout_secs),
        );
        Some(tokio::spawn(admin::serve(listener, router, plane.shutdown_signal())))
    } else {
        None
    };

    shutdown_signal().await;

    let remaining = plane.shutdown().await;
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!(open_connections = remaining, "Shutdown complete");
    Ok(())
}
