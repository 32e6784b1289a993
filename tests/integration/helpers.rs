//! Test helpers: scripted probes and a wired-up engine

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pulsewatch::{
    FeedItem, ReadingPayload,
    actors::{RunnerSinks, SchedulerHandle, StoreHandle},
    broadcaster::{Broadcaster, Subscription},
    config::{ConfigError, MonitorCatalog, MonitorConfig, RunnerSettings},
    probes::{Probe, ProbeError, ProbeFactory},
    storage::{EventBackend, MemoryEventBackend},
};

#[derive(Debug, Clone)]
pub enum Outcome {
    Latency(f64),
    Unreachable,
    Crash,
    Hang,
}

pub struct TestProbe {
    outcomes: VecDeque<Outcome>,
    fallback: Outcome,
    threshold: f64,
}

#[async_trait]
impl Probe for TestProbe {
    async fn measure(&mut self) -> Result<ReadingPayload, ProbeError> {
        match self.outcomes.pop_front().unwrap_or_else(|| self.fallback.clone()) {
            Outcome::Latency(latency) => Ok(ReadingPayload::ping_reply(latency, self.threshold)),
            Outcome::Unreachable => Err(ProbeError::Transient("host unreachable".into())),
            Outcome::Crash => Err(ProbeError::Fatal("executor crashed".into())),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Factory handing out scripted probes per monitor id
#[derive(Clone, Default)]
pub struct TestFactory {
    scripts: Arc<Mutex<HashMap<i64, (Vec<Outcome>, Outcome)>>>,
    builds: Arc<Mutex<Vec<i64>>>,
}

impl TestFactory {
    pub fn script(&self, monitor_id: i64, outcomes: Vec<Outcome>, fallback: Outcome) {
        self.scripts
            .lock()
            .unwrap()
            .insert(monitor_id, (outcomes, fallback));
    }

    pub fn builds_of(&self, monitor_id: i64) -> usize {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == monitor_id)
            .count()
    }
}

impl ProbeFactory for TestFactory {
    fn build(&self, config: &MonitorConfig) -> Result<Box<dyn Probe>, ConfigError> {
        self.builds.lock().unwrap().push(config.id);
        let (outcomes, fallback) = self
            .scripts
            .lock()
            .unwrap()
            .get(&config.id)
            .cloned()
            .unwrap_or((vec![], Outcome::Latency(1.0)));
        Ok(Box::new(TestProbe {
            outcomes: outcomes.into(),
            fallback,
            threshold: config.latency_threshold_ms(),
        }))
    }
}

pub fn ping_monitor(id: i64, name: &str, threshold: f64) -> MonitorConfig {
    MonitorConfig::ping(id, name, "192.0.2.1".parse().unwrap(), Duration::from_secs(1))
        .with_threshold(threshold)
}

/// Catalog, store, broadcaster and scheduler wired together
pub struct Engine {
    pub catalog: Arc<MonitorCatalog>,
    pub store: StoreHandle,
    pub broadcaster: Broadcaster,
    pub scheduler: SchedulerHandle,
    pub factory: TestFactory,
}

impl Engine {
    pub fn start(factory: TestFactory, monitors: Vec<MonitorConfig>) -> Self {
        Self::start_with_backend(factory, monitors, Box::new(MemoryEventBackend::new()))
    }

    pub fn start_with_backend(
        factory: TestFactory,
        monitors: Vec<MonitorConfig>,
        backend: Box<dyn EventBackend>,
    ) -> Self {
        let catalog = Arc::new(MonitorCatalog::new());
        catalog.replace_all(monitors);
        let store = StoreHandle::spawn(backend, None);
        let broadcaster = Broadcaster::new(256);
        let scheduler = SchedulerHandle::spawn(
            catalog.clone(),
            Arc::new(factory.clone()),
            RunnerSinks {
                broadcaster: broadcaster.clone(),
                store: store.clone(),
            },
            RunnerSettings::default(),
        );

        Self {
            catalog,
            store,
            broadcaster,
            scheduler,
            factory,
        }
    }

    pub async fn stop(self) {
        self.scheduler.shutdown().await.unwrap();
        self.store.flush().await.unwrap();
        self.store.shutdown().await.unwrap();
    }
}

/// Collects the next `count` feed items, skipping connection status
pub async fn collect(subscription: &mut Subscription, count: usize) -> Vec<FeedItem> {
    let mut items = Vec::with_capacity(count);
    while items.len() < count {
        match subscription.recv().await.expect("feed closed") {
            FeedItem::Status { .. } => {}
            item => items.push(item),
        }
    }
    items
}
