//! Control plane lifecycle: scaling, draining and shutdown with the loops running.

use std::sync::Arc;
use std::time::Duration;

use fleet_balancer::clock::ManualClock;
use fleet_balancer::config::{AutoScalingConfig, ControlPlaneConfig, ServerConfig};
use fleet_balancer::load_balancer::ServerStatus;
use fleet_balancer::{ControlEvent, ControlPlane};

mod common;

fn server(id: &str, port: u16) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        host: "127.0.0.1".into(),
        port,
        weight: 1,
    }
}

fn scaling_config(initial: usize) -> ControlPlaneConfig {
    ControlPlaneConfig {
        servers: (0..initial).map(|i| server(&format!("s{i}"), 8100 + i as u16)).collect(),
        autoscaling: AutoScalingConfig {
            enabled: true,
            min_instances: 2,
            max_instances: 4,
            scale_up_cooldown_secs: 0,
            scale_down_cooldown_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build(
    config: ControlPlaneConfig,
    load: Arc<common::FixedLoad>,
) -> (ControlPlane, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let plane = ControlPlane::builder(config)
        .clock(clock.clone())
        .probe(Arc::new(common::AlwaysUp))
        .collector(load)
        .build()
        .unwrap();
    (plane, clock)
}

#[tokio::test(start_paused = true)]
async fn test_scales_up_to_max_under_load() {
    let load = Arc::new(common::FixedLoad::new(95.0, 50.0));
    let (plane, _) = build(scaling_config(2), load);
    let mut events = plane.events().subscribe();
    plane.start();

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(plane.registry().active_count(), 4);
    let mut added = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControlEvent::InstanceAdded { id, .. } = event {
            added.push(id);
        }
    }
    assert_eq!(added.len(), 2);
    assert!(added.iter().all(|id| id.starts_with("auto-")));

    let report = plane.scaling_report();
    assert_eq!(report.current_instances, 4);
    assert!(report.secs_since_scale_up.is_some());

    plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scales_down_to_min_and_reaps() {
    let load = Arc::new(common::FixedLoad::new(1.0, 1.0));
    let (plane, clock) = build(scaling_config(4), load);
    plane.start();

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(plane.registry().active_count(), 2);
    assert_eq!(plane.registry().count_by_status(ServerStatus::Draining), 2);

    // Grace period is on the injected clock
    clock.advance(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(plane.registry().len(), 2);

    plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_removed_server_reaped_after_grace_period() {
    let config = ControlPlaneConfig {
        servers: vec![server("a", 8200), server("b", 8201)],
        ..Default::default()
    };
    let (plane, clock) = build(config, Arc::new(common::FixedLoad::default()));
    let mut events = plane.events().subscribe();
    plane.start();

    assert!(plane.remove_server("b"));
    assert!(!plane.remove_server("b"));
    for _ in 0..4 {
        assert_eq!(plane.select_server(None, None).unwrap().id, "a");
    }

    clock.advance(Duration::from_secs(29));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(plane.registry().get("b").is_some());

    clock.advance(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(plane.registry().get("b").is_none());

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert!(names.contains(&"serverDraining"));
    assert!(names.contains(&"serverRemoved"));

    plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sticky_sessions_expire() {
    let mut config = ControlPlaneConfig {
        servers: vec![server("a", 8300), server("b", 8301)],
        ..Default::default()
    };
    config.balancer.enable_sticky_sessions = true;
    config.balancer.session_affinity_ttl_secs = 60;
    let (plane, clock) = build(config, Arc::new(common::FixedLoad::default()));
    plane.start();

    let first = plane.select_server(None, Some("user-1")).unwrap();
    for _ in 0..5 {
        assert_eq!(plane.select_server(None, Some("user-1")).unwrap().id, first.id);
    }
    assert_eq!(plane.status().active_sessions, 1);

    clock.advance(Duration::from_secs(61));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(plane.status().active_sessions, 0);

    plane.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_selection() {
    let mut config = ControlPlaneConfig {
        servers: vec![server("a", 8400)],
        ..Default::default()
    };
    config.drain.shutdown_timeout_secs = 5;
    config.drain.reap_interval_ms = 50;
    let (plane, _) = build(config, Arc::new(common::FixedLoad::default()));
    plane.start();

    let guard = plane.select_server(None, None).unwrap().connect();
    let (remaining, ()) = tokio::join!(plane.shutdown(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);
    });

    assert_eq!(remaining, 0);
    assert!(plane.select_server(None, None).is_none());
    assert!(plane.status().shutting_down);
}
