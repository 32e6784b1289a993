//! Scheduler - keeps exactly one runner per enabled monitor definition
//!
//! The scheduler listens to [`MonitorCatalog`] changes and reconciles the set
//! of running monitors against the desired set: new definitions are started,
//! removed ones stopped, edited ones restarted with fresh state. A periodic
//! pass picks up monitors that faulted since the last reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{
    MonitorOverview, MonitorSnapshot, MonitorStatus, ReconcileSummary, RunnerExit,
    SchedulerCommand,
};
use super::runner::{RunnerExitReport, RunnerHandle, RunnerSinks};
use crate::config::{ConfigChange, MonitorCatalog, MonitorConfig, RunnerSettings};
use crate::probes::ProbeFactory;
use crate::{FeedItem, MonitorFault, MonitorId, MonitorKind};

struct RunnerEntry {
    config: MonitorConfig,
    handle: RunnerHandle,
}

struct FaultRecord {
    config: MonitorConfig,
    fault: MonitorFault,
    last_snapshot: MonitorSnapshot,
}

pub struct Scheduler {
    catalog: Arc<MonitorCatalog>,
    factory: Arc<dyn ProbeFactory>,
    sinks: RunnerSinks,
    settings: RunnerSettings,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    changes: Option<broadcast::Receiver<ConfigChange>>,
    exit_tx: mpsc::UnboundedSender<RunnerExitReport>,
    exit_rx: mpsc::UnboundedReceiver<RunnerExitReport>,
    desired: BTreeMap<MonitorId, MonitorConfig>,
    running: HashMap<MonitorId, RunnerEntry>,
    faults: HashMap<MonitorId, FaultRecord>,
    rejected: HashMap<MonitorId, (MonitorConfig, String)>,
}

impl Scheduler {
    pub fn new(
        command_rx: mpsc::Receiver<SchedulerCommand>,
        catalog: Arc<MonitorCatalog>,
        factory: Arc<dyn ProbeFactory>,
        sinks: RunnerSinks,
        settings: RunnerSettings,
    ) -> Self {
        // subscribe before listing so no change slips in between
        let changes = catalog.subscribe();
        let desired = catalog
            .list_monitor_configs()
            .into_iter()
            .map(|config| (config.id, config))
            .collect();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        Self {
            catalog,
            factory,
            sinks,
            settings,
            command_rx,
            changes: Some(changes),
            exit_tx,
            exit_rx,
            desired,
            running: HashMap::new(),
            faults: HashMap::new(),
            rejected: HashMap::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler with {} configured monitors", self.desired.len());
        self.reconcile().await;

        let period = self.settings.reconcile_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                change = recv_change(&mut self.changes) => {
                    match change {
                        Ok(change) => {
                            self.apply_change(change);
                            self.drain_changes();
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("missed {missed} configuration changes, resyncing");
                            self.resync();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("catalog closed, no further configuration changes");
                            self.changes = None;
                            continue;
                        }
                    }
                    self.reconcile().await;
                }

                Some(report) = self.exit_rx.recv() => {
                    self.handle_exit(report);
                }

                _ = ticker.tick() => {
                    trace!("periodic reconciliation");
                    self.reconcile().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("all scheduler handles dropped");
                        break;
                    };
                    match cmd {
                        SchedulerCommand::Reconcile { respond_to } => {
                            let summary = self.reconcile().await;
                            let _ = respond_to.send(summary);
                        }
                        SchedulerCommand::GetSnapshot { monitor_id, respond_to } => {
                            let _ = respond_to.send(self.snapshot(monitor_id));
                        }
                        SchedulerCommand::ListMonitors { respond_to } => {
                            let _ = respond_to.send(self.overview());
                        }
                        SchedulerCommand::GetFault { monitor_id, respond_to } => {
                            let fault = self.faults.get(&monitor_id).map(|record| record.fault.clone());
                            let _ = respond_to.send(fault);
                        }
                        SchedulerCommand::Shutdown { respond_to } => {
                            info!("scheduler shutting down");
                            self.stop_all().await;
                            let _ = respond_to.send(());
                            return;
                        }
                    }
                }
            }
        }

        self.stop_all().await;
    }

    fn apply_change(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::Upsert(config) => {
                trace!("monitor {} updated", config.id);
                self.desired.insert(config.id, config);
            }
            ConfigChange::Remove(id) => {
                trace!("monitor {id} removed");
                self.desired.remove(&id);
            }
        }
    }

    /// Coalesces a burst of changes into one reconciliation
    fn drain_changes(&mut self) {
        loop {
            let Some(changes) = self.changes.as_mut() else {
                return;
            };
            match changes.try_recv() {
                Ok(change) => self.apply_change(change),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("missed {missed} configuration changes, resyncing");
                    self.resync();
                    return;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return,
            }
        }
    }

    fn resync(&mut self) {
        self.desired = self
            .catalog
            .list_monitor_configs()
            .into_iter()
            .map(|config| (config.id, config))
            .collect();
    }

    fn handle_exit(&mut self, report: RunnerExitReport) {
        let current = self
            .running
            .get(&report.monitor_id)
            .is_some_and(|entry| entry.handle.instance() == report.instance);
        if !current {
            trace!("ignoring exit of replaced runner {}", report.monitor_id);
            return;
        }

        let RunnerExit::Faulted(reason) = report.exit else {
            return;
        };
        let Some(entry) = self.running.remove(&report.monitor_id) else {
            return;
        };
        error!("monitor {} faulted: {reason}", report.monitor_id);

        let last_snapshot = entry.handle.snapshot();

        let fault = MonitorFault {
            monitor_id: report.monitor_id,
            timestamp: Utc::now(),
            reason,
        };
        self.sinks.broadcaster.publish(FeedItem::Fault(fault.clone()));
        self.faults.insert(
            report.monitor_id,
            FaultRecord {
                config: entry.config,
                fault,
                last_snapshot,
            },
        );
    }

    /// Stops stale runners and starts missing ones
    async fn reconcile(&mut self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let stale: Vec<MonitorId> = self
            .running
            .iter()
            .filter(|(id, entry)| self.desired.get(id) != Some(&entry.config))
            .map(|(id, _)| *id)
            .collect();

        let mut stopping = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(entry) = self.running.remove(&id) {
                debug!("stopping monitor {id}");
                stopping.push(entry.handle);
            }
        }
        summary.stopped = stopping.len();
        join_all(stopping.iter_mut().map(RunnerHandle::stop)).await;

        self.faults
            .retain(|id, record| self.desired.get(id) == Some(&record.config));
        self.rejected
            .retain(|id, (config, _)| self.desired.get(id) == Some(config));

        let missing: Vec<MonitorConfig> = self
            .desired
            .values()
            .filter(|config| config.kind != MonitorKind::Events)
            .filter(|config| !self.running.contains_key(&config.id))
            .filter(|config| !self.rejected.contains_key(&config.id))
            .cloned()
            .collect();

        for config in missing {
            match config.validate().and_then(|_| self.factory.build(&config)) {
                Ok(probe) => {
                    if self.faults.remove(&config.id).is_some() {
                        info!("restarting faulted monitor {}", config.id);
                    } else {
                        info!("starting monitor {} ({})", config.id, config.name);
                    }
                    let handle = RunnerHandle::spawn_supervised(
                        config.clone(),
                        probe,
                        self.sinks.clone(),
                        &self.settings,
                        self.exit_tx.clone(),
                    );
                    self.running.insert(config.id, RunnerEntry { config, handle });
                    summary.started += 1;
                }
                Err(e) => {
                    warn!("not starting monitor {}: {e}", config.id);
                    self.rejected.insert(config.id, (config, e.to_string()));
                }
            }
        }

        summary.rejected = self.rejected.len();
        summary.running = self.running.len();
        if summary.started > 0 || summary.stopped > 0 {
            debug!(
                "reconciled: {} started, {} stopped, {} running",
                summary.started, summary.stopped, summary.running
            );
        }
        summary
    }

    fn snapshot(&self, monitor_id: MonitorId) -> Option<MonitorSnapshot> {
        if let Some(entry) = self.running.get(&monitor_id) {
            return Some(entry.handle.snapshot());
        }
        self.faults
            .get(&monitor_id)
            .map(|record| record.last_snapshot.clone())
    }

    fn overview(&self) -> Vec<MonitorOverview> {
        self.desired
            .values()
            .map(|config| {
                let (status, detail, snapshot) = if config.kind == MonitorKind::Events {
                    (MonitorStatus::Passive, None, None)
                } else if let Some(entry) = self.running.get(&config.id) {
                    (MonitorStatus::Running, None, Some(entry.handle.snapshot()))
                } else if let Some(record) = self.faults.get(&config.id) {
                    (
                        MonitorStatus::Faulted,
                        Some(record.fault.reason.clone()),
                        Some(record.last_snapshot.clone()),
                    )
                } else if let Some((_, reason)) = self.rejected.get(&config.id) {
                    (MonitorStatus::Rejected, Some(reason.clone()), None)
                } else {
                    // edited while being restarted
                    (MonitorStatus::Running, None, None)
                };

                MonitorOverview {
                    monitor_id: config.id,
                    name: config.name.clone(),
                    kind: config.kind,
                    status,
                    detail,
                    snapshot,
                }
            })
            .collect()
    }

    async fn stop_all(&mut self) {
        let mut handles: Vec<RunnerHandle> =
            self.running.drain().map(|(_, entry)| entry.handle).collect();
        debug!("stopping {} monitors", handles.len());
        join_all(handles.iter_mut().map(RunnerHandle::stop)).await;
    }
}

async fn recv_change(
    changes: &mut Option<broadcast::Receiver<ConfigChange>>,
) -> Result<ConfigChange, broadcast::error::RecvError> {
    match changes {
        Some(changes) => changes.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle for the Scheduler actor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(
        catalog: Arc<MonitorCatalog>,
        factory: Arc<dyn ProbeFactory>,
        sinks: RunnerSinks,
        settings: RunnerSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = Scheduler::new(cmd_rx, catalog, factory, sinks, settings);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> anyhow::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .context("scheduler is not running")?;
        rx.await.context("failed to receive response")
    }

    /// Reconciles immediately instead of waiting for the next change
    pub async fn reconcile(&self) -> anyhow::Result<ReconcileSummary> {
        self.request(|respond_to| SchedulerCommand::Reconcile { respond_to })
            .await
    }

    pub async fn snapshot(&self, monitor_id: MonitorId) -> anyhow::Result<Option<MonitorSnapshot>> {
        self.request(|respond_to| SchedulerCommand::GetSnapshot {
            monitor_id,
            respond_to,
        })
        .await
    }

    pub async fn list_monitors(&self) -> anyhow::Result<Vec<MonitorOverview>> {
        self.request(|respond_to| SchedulerCommand::ListMonitors { respond_to })
            .await
    }

    pub async fn fault(&self, monitor_id: MonitorId) -> anyhow::Result<Option<MonitorFault>> {
        self.request(|respond_to| SchedulerCommand::GetFault {
            monitor_id,
            respond_to,
        })
        .await
    }

    /// Stops all runners; resolves once they are stopped
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.request(|respond_to| SchedulerCommand::Shutdown { respond_to })
            .await
    }
}
