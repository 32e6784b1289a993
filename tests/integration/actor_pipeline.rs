//! Catalog → scheduler → runner → broadcaster / event store

use pretty_assertions::assert_eq;
use pulsewatch::{EventType, FeedItem, ReadingPayload, actors::MonitorStatus};

use crate::helpers::{Engine, Outcome, TestFactory, collect, ping_monitor};

#[tokio::test(start_paused = true)]
async fn test_readings_and_events_reach_feed_and_store_in_order() {
    let factory = TestFactory::default();
    factory.script(
        1,
        [2.0, 3.0, 7.0, 8.0, 4.0, 12.0]
            .into_iter()
            .map(Outcome::Latency)
            .collect(),
        Outcome::Latency(1.0),
    );
    let engine = Engine::start(
        factory,
        vec![ping_monitor(1, "Gateway", 5.0), ping_monitor(2, "DNS", 5.0)],
    );
    let mut feed = engine.broadcaster.subscribe();

    let mut timeline = Vec::new();
    let mut other_readings = 0;
    while timeline.len() < 8 {
        for item in collect(&mut feed, 1).await {
            match (item.monitor_id(), item) {
                (Some(1), FeedItem::Reading(reading)) => {
                    let ReadingPayload::Ping { latency_ms, .. } = reading.payload else {
                        panic!("expected a ping reading");
                    };
                    timeline.push(format!("reading {}", latency_ms.unwrap()));
                }
                (Some(1), FeedItem::Event(event)) => {
                    assert_eq!(event.event_type, EventType::Threshold);
                    assert_eq!(event.id, None);
                    timeline.push(format!("event {}", event.value.unwrap()));
                }
                (Some(2), FeedItem::Reading(_)) => other_readings += 1,
                (_, item) => panic!("unexpected feed item {item:?}"),
            }
        }
    }

    assert_eq!(
        timeline,
        vec![
            "reading 2",
            "reading 3",
            "reading 7",
            "event 7",
            "reading 8",
            "reading 4",
            "reading 12",
            "event 12",
        ]
    );
    assert!(other_readings >= 5);

    engine.store.flush().await.unwrap();
    let stored = engine.store.query_recent(10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].message, "[Gateway] Latency 12ms exceeds threshold 5ms");
    assert_eq!(stored[1].message, "[Gateway] Latency 7ms exceeds threshold 5ms");
    assert!(stored.iter().all(|event| event.id.is_some()));

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_follow_readings() {
    let factory = TestFactory::default();
    factory.script(
        1,
        vec![Outcome::Latency(2.0), Outcome::Unreachable, Outcome::Latency(6.0)],
        Outcome::Hang,
    );
    let engine = Engine::start(factory, vec![ping_monitor(1, "Gateway", 5.0)]);
    let mut feed = engine.broadcaster.subscribe();

    // two readings, loss event, reading, threshold event
    collect(&mut feed, 5).await;

    let snapshot = engine.scheduler.snapshot(1).await.unwrap().unwrap();
    let stats = serde_json::to_value(&snapshot.stats).unwrap();
    assert_eq!(stats["kind"], "ping");
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["lost"], 1);
    assert_eq!(stats["max_ms"], 6.0);
    assert_eq!(stats["last_ms"], 6.0);
    assert!(snapshot.available);

    let overview = engine.scheduler.list_monitors().await.unwrap();
    assert_eq!(overview[0].status, MonitorStatus::Running);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_monitor_is_never_probed() {
    let factory = TestFactory::default();
    let mut log = ping_monitor(5, "Event Log", 5.0);
    log.kind = pulsewatch::MonitorKind::Events;
    log.target = None;
    let engine = Engine::start(factory.clone(), vec![log]);

    let summary = engine.scheduler.reconcile().await.unwrap();
    assert_eq!(summary.running, 0);
    assert_eq!(factory.builds_of(5), 0);

    let overview = engine.scheduler.list_monitors().await.unwrap();
    assert_eq!(overview[0].status, MonitorStatus::Passive);
    assert_eq!(engine.scheduler.snapshot(5).await.unwrap(), None);

    engine.stop().await;
}
