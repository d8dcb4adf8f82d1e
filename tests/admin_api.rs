//! Admin API over a real socket, the way fleetctl talks to it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use fleet_balancer::admin;
use fleet_balancer::config::ControlPlaneConfig;
use fleet_balancer::ControlPlane;

mod common;

async fn start() -> (String, Arc<ControlPlane>, tokio::task::JoinHandle<Result<(), std::io::Error>>) {
    let plane = Arc::new(
        ControlPlane::builder(ControlPlaneConfig::default())
            .probe(Arc::new(common::AlwaysUp))
            .build()
            .unwrap(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = admin::setup_admin_router(plane.clone(), Duration::from_secs(5));
    let server = tokio::spawn(admin::serve(listener, router, plane.shutdown_signal()));
    (base, plane, server)
}

#[tokio::test]
async fn test_register_route_and_remove() {
    let (base, plane, server) = start().await;
    let client = reqwest::Client::new();

    for (id, port) in [("a", 9101), ("b", 9102)] {
        let res = client
            .post(format!("{base}/admin/servers"))
            .json(&json!({ "id": id, "host": "127.0.0.1", "port": port }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
    }

    let mut picked = Vec::new();
    for _ in 0..4 {
        let server: Value = client
            .get(format!("{base}/admin/select"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        picked.push(server["id"].as_str().unwrap().to_string());
    }
    assert_eq!(picked, vec!["a", "b", "a", "b"]);

    let res = client
        .get(format!("{base}/admin/select"))
        .query(&[("client_ip", "192.168.1.100")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client.delete(format!("{base}/admin/servers/b")).send().await.unwrap();
    assert_eq!(res.status(), 202);

    let status: Value = client
        .get(format!("{base}/admin/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["healthy"], 1);
    assert_eq!(status["draining"], 1);

    let text = client
        .get(format!("{base}/admin/health"))
        .query(&[("format", "text")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("2 total, 1 healthy, 0 unhealthy, 1 draining"));

    plane.shutdown().await;
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_errors_are_json() {
    let (base, plane, server) = start().await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{base}/admin/select")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "no healthy backend available");

    let res = client
        .put(format!("{base}/admin/servers/ghost/weight"))
        .json(&json!({ "weight": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = client
        .post(format!("{base}/admin/servers"))
        .json(&json!({ "id": "", "host": "127.0.0.1", "port": 9100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    plane.shutdown().await;
    server.await.unwrap().unwrap();
}
