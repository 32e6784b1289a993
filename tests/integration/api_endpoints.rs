//! HTTP surface over a running engine

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use pulsewatch::api::{ApiConfig, ApiState, build_router, spawn_api_server};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use crate::helpers::{Engine, Outcome, TestFactory, collect, ping_monitor};

async fn get_json(state: &ApiState, uri: &str) -> (StatusCode, Value) {
    let response = build_router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_monitor_and_event_endpoints() {
    let factory = TestFactory::default();
    factory.script(1, vec![Outcome::Latency(30.0)], Outcome::Hang);
    let engine = Engine::start(factory, vec![ping_monitor(1, "Gateway", 5.0)]);
    let mut feed = engine.broadcaster.subscribe();
    // reading + threshold event
    collect(&mut feed, 2).await;
    engine.store.flush().await.unwrap();

    let state = ApiState::new(
        engine.scheduler.clone(),
        engine.store.clone(),
        engine.broadcaster.clone(),
    );

    let (status, body) = get_json(&state, "/api/v1/monitors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["monitors"][0]["name"], "Gateway");
    assert_eq!(body["monitors"][0]["status"], "running");

    let (status, body) = get_json(&state, "/api/v1/monitors/1/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"], 1);
    assert_eq!(body["stats"]["last_ms"], 30.0);
    assert_eq!(body["available"], true);

    let (status, body) = get_json(&state, "/api/v1/events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["event_type"], "threshold");
    assert_eq!(
        body["events"][0]["message"],
        "[Gateway] Latency 30ms exceeds threshold 5ms"
    );

    let (status, body) = get_json(&state, "/api/v1/events/range?monitor_id=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    engine.stop().await;
}

#[tokio::test]
async fn test_server_answers_over_tcp() {
    let engine = Engine::start(TestFactory::default(), vec![]);
    let state = ApiState::new(
        engine.scheduler.clone(),
        engine.store.clone(),
        engine.broadcaster.clone(),
    );
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..ApiConfig::default()
    };
    let addr = spawn_api_server(config, state).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/v1/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("\"status\":\"ok\""));

    engine.stop().await;
}
