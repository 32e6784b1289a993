//! Event persistence through the store actor into SQLite

use std::time::Duration;

use chrono::Utc;
use pulsewatch::{
    Event, EventType,
    actors::{Retention, StoreHandle},
    config::MonitorConfig,
    storage::{EventBackend, EventQuery, sqlite::SqliteEventBackend},
};
use tempfile::tempdir;

use crate::helpers::{Engine, Outcome, TestFactory};

fn event(monitor_id: i64, age: chrono::Duration, message: &str) -> Event {
    Event {
        id: None,
        monitor_id,
        event_type: EventType::Threshold,
        timestamp: Utc::now() - age,
        message: message.to_string(),
        value: Some(12.5),
        threshold: Some(5.0),
    }
}

#[tokio::test]
async fn test_detected_events_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("events.db");

    let factory = TestFactory::default();
    factory.script(
        7,
        vec![Outcome::Latency(9.0), Outcome::Latency(1.0), Outcome::Unreachable],
        Outcome::Hang,
    );
    let monitor = MonitorConfig::ping(
        7,
        "Branch Office",
        "198.51.100.7".parse().unwrap(),
        Duration::from_millis(50),
    )
    .with_threshold(5.0);

    let backend = SqliteEventBackend::new(&db_path).await.unwrap();
    let engine = Engine::start_with_backend(factory, vec![monitor], Box::new(backend));

    // three ticks at 50ms spacing
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reopened = SqliteEventBackend::new(&db_path).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);

    let events = reopened
        .query_range(EventQuery {
            monitor_id: Some(7),
            start: Utc::now() - chrono::Duration::minutes(5),
            end: Utc::now(),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::Threshold);
    assert_eq!(events[0].value, Some(9.0));
    assert_eq!(events[0].threshold, Some(5.0));
    assert_eq!(events[1].event_type, EventType::PacketLoss);
    assert_eq!(events[1].message, "[Branch Office] Packet loss detected to 198.51.100.7");
    assert!(events[0].id < events[1].id);
}

#[tokio::test]
async fn test_retention_prunes_old_events_on_startup() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("events.db");

    let backend = SqliteEventBackend::new(&db_path).await.unwrap();
    backend
        .append(event(1, chrono::Duration::days(45), "old"))
        .await
        .unwrap();
    backend
        .append(event(1, chrono::Duration::days(2), "recent"))
        .await
        .unwrap();

    let store = StoreHandle::spawn(
        Box::new(backend),
        Some(Retention {
            days: 30,
            cleanup_interval: Duration::from_secs(3600),
        }),
    );

    assert_eq!(store.count().await.unwrap(), 1);
    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.pruned, 1);
    assert!(stats.last_prune.is_some());

    let remaining = store.query_recent(10).await.unwrap();
    assert_eq!(remaining[0].message, "recent");

    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recent_events_newest_first_with_limit() {
    let dir = tempdir().unwrap();
    let backend = SqliteEventBackend::new(dir.path().join("events.db"))
        .await
        .unwrap();
    let store = StoreHandle::spawn(Box::new(backend), None);

    for (minutes, message) in [(30, "first"), (20, "second"), (10, "third")] {
        store.append(event(2, chrono::Duration::minutes(minutes), message));
    }
    store.flush().await.unwrap();

    let recent = store.query_recent(2).await.unwrap();
    let messages: Vec<_> = recent.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["third", "second"]);

    let pruned = store
        .prune(Utc::now() - chrono::Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(pruned, 2);
    assert_eq!(store.count().await.unwrap(), 1);

    store.shutdown().await.unwrap();
}
