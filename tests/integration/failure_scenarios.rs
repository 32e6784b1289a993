//! Probe crashes, unreachable targets and event store outages

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsewatch::{
    Event, EventType, FeedItem,
    actors::MonitorStatus,
    storage::{
        EventBackend, EventQuery, HealthStatus, MemoryEventBackend, StorageError, StorageResult,
    },
};

use crate::helpers::{Engine, Outcome, TestFactory, collect, ping_monitor};

/// Fails the first `outage` appends, then delegates
struct OutageBackend {
    inner: MemoryEventBackend,
    outage: usize,
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl EventBackend for OutageBackend {
    async fn append(&self, event: Event) -> StorageResult<i64> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.outage {
            return Err(StorageError::Unavailable("database locked".into()));
        }
        self.inner.append(event).await
    }

    async fn query_range(&self, query: EventQuery) -> StorageResult<Vec<Event>> {
        self.inner.query_range(query).await
    }

    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<Event>> {
        self.inner.query_recent(limit).await
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.prune(older_than).await
    }

    async fn count(&self) -> StorageResult<u64> {
        self.inner.count().await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_faulted_monitor_is_reported_and_restarted() {
    let factory = TestFactory::default();
    factory.script(
        1,
        vec![Outcome::Crash, Outcome::Crash, Outcome::Crash],
        Outcome::Latency(1.0),
    );
    let engine = Engine::start(factory.clone(), vec![ping_monitor(1, "Gateway", 5.0)]);
    let mut feed = engine.broadcaster.subscribe();

    let items = collect(&mut feed, 4).await;
    assert!(items[..3].iter().all(|item| matches!(item, FeedItem::ProbeFailure { .. })));
    let FeedItem::Fault(fault) = &items[3] else {
        panic!("expected a fault, got {:?}", items[3]);
    };
    assert_eq!(fault.monitor_id, 1);
    assert!(fault.reason.contains("executor crashed"));

    let overview = engine.scheduler.list_monitors().await.unwrap();
    assert_eq!(overview[0].status, MonitorStatus::Faulted);

    // the restarted runner gets a fresh probe from the factory
    let summary = engine.scheduler.reconcile().await.unwrap();
    assert_eq!(summary.started, 1);
    assert_eq!(engine.factory.builds_of(1), 2);

    let overview = engine.scheduler.list_monitors().await.unwrap();
    assert_eq!(overview[0].status, MonitorStatus::Running);
    assert_eq!(engine.scheduler.fault(1).await.unwrap(), None);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_target_marks_monitor_unavailable_until_recovery() {
    let factory = TestFactory::default();
    factory.script(
        1,
        vec![Outcome::Unreachable; 3],
        Outcome::Latency(1.0),
    );
    let engine = Engine::start(factory, vec![ping_monitor(1, "Gateway", 5.0)]);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let snapshot = engine.scheduler.snapshot(1).await.unwrap().unwrap();
    assert!(!snapshot.available);
    assert_eq!(snapshot.consecutive_failures, 3);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let snapshot = engine.scheduler.snapshot(1).await.unwrap().unwrap();
    assert!(snapshot.available);

    engine.store.flush().await.unwrap();
    let events = engine.store.query_recent(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::PacketLoss);
    assert_eq!(events[0].message, "[Gateway] Packet loss detected to 192.0.2.1");

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_does_not_delay_live_events() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let backend = OutageBackend {
        inner: MemoryEventBackend::new(),
        outage: 4,
        attempts: attempts.clone(),
    };
    let factory = TestFactory::default();
    factory.script(
        1,
        vec![Outcome::Latency(9.0), Outcome::Latency(1.0), Outcome::Latency(9.0)],
        Outcome::Latency(1.0),
    );
    let engine =
        Engine::start_with_backend(factory, vec![ping_monitor(1, "Gateway", 5.0)], Box::new(backend));
    let mut feed = engine.broadcaster.subscribe();

    let items = collect(&mut feed, 5).await;
    let live_events = items
        .iter()
        .filter(|item| matches!(item, FeedItem::Event(_)))
        .count();
    assert_eq!(live_events, 2);

    // backoff retries eventually persist both, in order
    tokio::time::sleep(Duration::from_secs(5)).await;
    let stats = engine.store.get_stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.appended, 2);
    assert!(attempts.load(Ordering::SeqCst) >= 6);

    let stored = engine
        .store
        .query_range(EventQuery {
            monitor_id: Some(1),
            start: Utc::now() - chrono::Duration::hours(1),
            end: Utc::now() + chrono::Duration::hours(1),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored[0].timestamp <= stored[1].timestamp);

    engine.stop().await;
}
