//! Independence of monitors and concurrent subscriber churn

use std::collections::HashMap;
use std::time::Duration;

use pulsewatch::{FeedItem, broadcaster::Broadcaster};

use crate::helpers::{Engine, Outcome, TestFactory, collect, ping_monitor};

#[tokio::test(start_paused = true)]
async fn test_hung_probe_does_not_block_other_monitors() {
    let factory = TestFactory::default();
    factory.script(1, vec![], Outcome::Hang);
    let engine = Engine::start(
        factory,
        vec![ping_monitor(1, "Stuck", 5.0), ping_monitor(2, "Healthy", 5.0)],
    );
    let mut feed = engine.broadcaster.subscribe();

    let items = collect(&mut feed, 5).await;
    assert!(items.iter().all(|item| item.monitor_id() == Some(2)));

    // stopping the stuck runner cancels its in-flight probe
    engine.catalog.remove(1);
    let summary = engine.scheduler.reconcile().await.unwrap();
    assert_eq!(summary.running, 1);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_many_monitors_tick_independently() {
    let factory = TestFactory::default();
    let monitors = (1..=20)
        .map(|id| ping_monitor(id, &format!("Host {id}"), 5.0))
        .collect();
    let engine = Engine::start(factory, monitors);
    let mut feed = engine.broadcaster.subscribe();

    let mut per_monitor: HashMap<i64, usize> = HashMap::new();
    for item in collect(&mut feed, 60).await {
        if let FeedItem::Reading(reading) = item {
            *per_monitor.entry(reading.monitor_id).or_default() += 1;
        }
    }
    assert_eq!(per_monitor.len(), 20);
    assert!(per_monitor.values().all(|count| *count == 3));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribers_join_and_leave_during_publish() {
    let broadcaster = Broadcaster::new(8);

    let publisher = {
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            for _ in 0..2_000 {
                broadcaster.publish(FeedItem::ProbeFailure {
                    monitor_id: 1,
                    timestamp: chrono::Utc::now(),
                    message: "tick".to_string(),
                });
                tokio::task::yield_now().await;
            }
        })
    };

    let mut viewers = Vec::new();
    for _ in 0..16 {
        let broadcaster = broadcaster.clone();
        viewers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let mut subscription = broadcaster.subscribe();
                // connection status always arrives first
                assert!(matches!(
                    subscription.recv().await,
                    Some(FeedItem::Status { .. })
                ));
                let _ = tokio::time::timeout(Duration::from_millis(5), subscription.recv()).await;
            }
        }));
    }

    for viewer in viewers {
        viewer.await.unwrap();
    }
    publisher.await.unwrap();
    assert_eq!(broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn test_slow_subscriber_keeps_latest_items() {
    let broadcaster = Broadcaster::new(10);
    let mut slow = broadcaster.subscribe();
    let mut fast = broadcaster.subscribe();
    assert!(matches!(fast.recv().await, Some(FeedItem::Status { .. })));

    let mut fast_seen = 0;
    for n in 0..15 {
        broadcaster.publish(FeedItem::ProbeFailure {
            monitor_id: 1,
            timestamp: chrono::Utc::now(),
            message: n.to_string(),
        });
        if fast.recv().await.is_some() {
            fast_seen += 1;
        }
    }
    assert_eq!(fast_seen, 15);
    assert_eq!(fast.dropped(), 0);

    let mut messages = Vec::new();
    while let Some(item) = slow.try_recv() {
        if let FeedItem::ProbeFailure { message, .. } = item {
            messages.push(message);
        }
    }
    let expected: Vec<String> = (5..15).map(|n| n.to_string()).collect();
    assert_eq!(messages, expected);
    assert_eq!(slow.dropped(), 5);
}
