//! MonitorRunner - drives the probe loop of one monitor
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Probe → RollingStats + EventDetector → Broadcaster (Reading, Event)
//!     ↑                                            └→ EventStore (Event)
//!     └─── Commands (PollNow) / shutdown signal
//! ```
//!
//! Each runner exclusively owns its statistics and detector state. Executor
//! crashes (fatal errors or panics) are counted; too many in a row end the
//! runner with [`RunnerExit::Faulted`] so its supervisor can restart it fresh.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

use super::event_store::StoreHandle;
use super::messages::{MonitorSnapshot, RunnerCommand, RunnerExit, RunnerState};
use crate::broadcaster::Broadcaster;
use crate::config::{MonitorConfig, RunnerSettings};
use crate::monitors::{EventDetector, RollingStats};
use crate::probes::{Probe, ProbeError};
use crate::{FeedItem, MonitorId, MonitorKind, Reading, ReadingPayload};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Where a runner delivers its output
#[derive(Clone)]
pub struct RunnerSinks {
    pub broadcaster: Broadcaster,
    pub store: StoreHandle,
}

/// Sent to a supervisor when a runner's task ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerExitReport {
    pub monitor_id: MonitorId,
    /// Distinguishes successive runners of the same monitor
    pub instance: u64,
    pub exit: RunnerExit,
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

pub struct MonitorRunner {
    config: MonitorConfig,
    probe: Box<dyn Probe>,
    stats: RollingStats,
    detector: EventDetector,
    sinks: RunnerSinks,
    settings: RunnerSettings,
    command_rx: mpsc::Receiver<RunnerCommand>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<RunnerState>,
    snapshot_tx: watch::Sender<MonitorSnapshot>,
    consecutive_crashes: u32,
    consecutive_failures: u32,
    last_crash: Option<String>,
    last_update: Option<DateTime<Utc>>,
}

impl MonitorRunner {
    #[instrument(skip(self), fields(monitor = self.config.id))]
    pub async fn run(mut self) -> RunnerExit {
        debug!("starting runner for {} ({})", self.config.name, self.config.kind);
        self.set_state(RunnerState::Running);

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            if *self.shutdown_rx.borrow_and_update() {
                break RunnerExit::Stopped;
            }

            tokio::select! {
                biased;

                // also fires when every handle is gone
                _ = self.shutdown_rx.changed() => break RunnerExit::Stopped,

                _ = ticker.tick() => {
                    if let Some(exit) = self.tick(None).await {
                        break exit;
                    }
                }

                Some(cmd) = self.command_rx.recv() => match cmd {
                    RunnerCommand::PollNow { respond_to } => {
                        debug!("received PollNow command");
                        if let Some(exit) = self.tick(Some(respond_to)).await {
                            break exit;
                        }
                    }
                },
            }
        };

        self.set_state(RunnerState::Stopping);
        match &exit {
            RunnerExit::Stopped => debug!("runner stopped"),
            RunnerExit::Faulted(reason) => error!("runner faulted: {reason}"),
        }
        self.set_state(RunnerState::Stopped);
        exit
    }

    /// One probe cycle. Returns the exit reason if the runner has to end.
    async fn tick(
        &mut self,
        respond_to: Option<oneshot::Sender<Result<(), ProbeError>>>,
    ) -> Option<RunnerExit> {
        let Some(result) = self.measure().await else {
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(Err(ProbeError::Transient(
                    "monitor is stopping".to_string(),
                )));
            }
            return Some(RunnerExit::Stopped);
        };

        let outcome = result.as_ref().map(|_| ()).map_err(|err| err.clone());
        self.handle_result(result);
        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(outcome);
        }

        if self.consecutive_crashes >= self.settings.max_consecutive_crashes {
            let last = self.last_crash.as_deref().unwrap_or("unknown");
            return Some(RunnerExit::Faulted(format!(
                "{} consecutive executor crashes, last: {last}",
                self.consecutive_crashes
            )));
        }
        None
    }

    /// Runs the probe until it completes or shutdown is requested
    async fn measure(&mut self) -> Option<Result<ReadingPayload, ProbeError>> {
        let probe = AssertUnwindSafe(self.probe.measure()).catch_unwind();

        tokio::select! {
            biased;

            _ = self.shutdown_rx.changed() => {
                trace!("in-flight probe cancelled");
                None
            }

            result = probe => Some(result.unwrap_or_else(|panic| {
                Err(ProbeError::Fatal(panic_message(panic.as_ref())))
            })),
        }
    }

    fn handle_result(&mut self, result: Result<ReadingPayload, ProbeError>) {
        match result {
            Ok(payload) => {
                self.consecutive_crashes = 0;
                self.dispatch(payload);
            }
            Err(ProbeError::Transient(message)) => {
                self.consecutive_crashes = 0;
                warn!("probe failed: {message}");
                match self.config.kind {
                    MonitorKind::Ping => self.dispatch(ReadingPayload::ping_loss()),
                    _ => self.report_failure(message),
                }
            }
            Err(ProbeError::Fatal(message)) => {
                self.consecutive_crashes += 1;
                error!(
                    "probe crashed ({}/{}): {message}",
                    self.consecutive_crashes, self.settings.max_consecutive_crashes
                );
                self.last_crash = Some(message.clone());
                self.report_failure(message);
            }
        }
    }

    /// Feeds a reading through stats and detector, then delivers it
    fn dispatch(&mut self, payload: ReadingPayload) {
        let now = Utc::now();
        let failed = matches!(payload, ReadingPayload::Ping { packet_loss: true, .. });
        if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }

        let reading = Reading {
            monitor_id: self.config.id,
            monitor_name: self.config.name.clone(),
            timestamp: now,
            payload,
        };
        self.stats.update(&reading.payload);
        let event = self.detector.evaluate(&reading);

        trace!("reading: {:?}", reading.payload);
        self.sinks.broadcaster.publish(FeedItem::Reading(reading));

        if let Some(event) = event {
            info!("{}", event.message);
            self.sinks.store.append(event.clone());
            self.sinks.broadcaster.publish(FeedItem::Event(event));
        }

        self.last_update = Some(now);
        self.publish_snapshot();
    }

    /// A probe attempt without a reading. Never reported as a zero value.
    fn report_failure(&mut self, message: String) {
        self.consecutive_failures += 1;
        if self.consecutive_failures == self.settings.unavailable_after {
            warn!("monitor unavailable after {} failed probes", self.consecutive_failures);
        }

        self.sinks.broadcaster.publish(FeedItem::ProbeFailure {
            monitor_id: self.config.id,
            timestamp: Utc::now(),
            message,
        });
        self.publish_snapshot();
    }

    fn snapshot(&self, state: RunnerState) -> MonitorSnapshot {
        MonitorSnapshot {
            monitor_id: self.config.id,
            name: self.config.name.clone(),
            kind: self.config.kind,
            state,
            available: self.consecutive_failures < self.settings.unavailable_after,
            consecutive_failures: self.consecutive_failures,
            last_update: self.last_update,
            stats: self.stats.snapshot(),
        }
    }

    fn publish_snapshot(&self) {
        let state = *self.state_tx.borrow();
        self.snapshot_tx.send_replace(self.snapshot(state));
    }

    fn set_state(&self, state: RunnerState) {
        self.state_tx.send_replace(state);
        self.snapshot_tx.send_replace(self.snapshot(state));
    }
}

/// Owning handle of a running monitor
///
/// Not `Clone`: exactly one owner decides when the runner stops.
pub struct RunnerHandle {
    monitor_id: MonitorId,
    instance: u64,
    sender: mpsc::Sender<RunnerCommand>,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<RunnerState>,
    snapshot_rx: watch::Receiver<MonitorSnapshot>,
    task: Option<JoinHandle<RunnerExit>>,
    stop_grace: Duration,
}

impl RunnerHandle {
    pub fn spawn(
        config: MonitorConfig,
        probe: Box<dyn Probe>,
        sinks: RunnerSinks,
        settings: &RunnerSettings,
    ) -> Self {
        Self::spawn_inner(config, probe, sinks, settings, None)
    }

    /// Like [`RunnerHandle::spawn`], additionally reporting the exit to `exits`
    pub fn spawn_supervised(
        config: MonitorConfig,
        probe: Box<dyn Probe>,
        sinks: RunnerSinks,
        settings: &RunnerSettings,
        exits: mpsc::UnboundedSender<RunnerExitReport>,
    ) -> Self {
        Self::spawn_inner(config, probe, sinks, settings, Some(exits))
    }

    fn spawn_inner(
        config: MonitorConfig,
        probe: Box<dyn Probe>,
        sinks: RunnerSinks,
        settings: &RunnerSettings,
        exits: Option<mpsc::UnboundedSender<RunnerExitReport>>,
    ) -> Self {
        let monitor_id = config.id;
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);

        let (cmd_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(RunnerState::Starting);

        let stats = RollingStats::for_kind(config.kind);
        let (snapshot_tx, snapshot_rx) = watch::channel(MonitorSnapshot {
            monitor_id,
            name: config.name.clone(),
            kind: config.kind,
            state: RunnerState::Starting,
            available: true,
            consecutive_failures: 0,
            last_update: None,
            stats: stats.snapshot(),
        });

        let actor = MonitorRunner {
            detector: EventDetector::new(&config),
            config,
            probe,
            stats,
            sinks,
            settings: settings.clone(),
            command_rx,
            shutdown_rx,
            state_tx,
            snapshot_tx,
            consecutive_crashes: 0,
            consecutive_failures: 0,
            last_crash: None,
            last_update: None,
        };

        let task = tokio::spawn(async move {
            let exit = AssertUnwindSafe(actor.run())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| RunnerExit::Faulted(panic_message(panic.as_ref())));

            if let Some(exits) = exits {
                let report = RunnerExitReport {
                    monitor_id,
                    instance,
                    exit: exit.clone(),
                };
                if exits.send(report).is_err() {
                    trace!("runner {monitor_id} exited without supervisor");
                }
            }
            exit
        });

        Self {
            monitor_id,
            instance,
            sender: cmd_tx,
            shutdown_tx,
            state_rx,
            snapshot_rx,
            task: Some(task),
            stop_grace: settings.stop_grace(),
        }
    }

    pub fn monitor_id(&self) -> MonitorId {
        self.monitor_id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn state(&self) -> RunnerState {
        match &self.task {
            Some(task) if !task.is_finished() => *self.state_rx.borrow(),
            _ => RunnerState::Stopped,
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let mut snapshot = self.snapshot_rx.borrow().clone();
        snapshot.state = self.state();
        snapshot
    }

    /// Probes immediately and reports the probe outcome
    pub async fn poll_now(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RunnerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Stops the runner, cancelling an in-flight probe, and waits up to the
    /// grace period before aborting the task. Calling it again is a no-op
    /// returning `None`.
    #[instrument(skip(self), fields(monitor = self.monitor_id))]
    pub async fn stop(&mut self) -> Option<RunnerExit> {
        self.shutdown_tx.send_replace(true);
        let mut task = self.task.take()?;

        match timeout(self.stop_grace, &mut task).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(join_error)) => {
                error!("runner task failed: {join_error}");
                Some(RunnerExit::Faulted(join_error.to_string()))
            }
            Err(_) => {
                warn!("runner did not stop within {:?}, aborting", self.stop_grace);
                task.abort();
                let _ = task.await;
                Some(RunnerExit::Stopped)
            }
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shutdown_tx.send_replace(true);
            // runner winds down on its own, nobody waits for it
            drop(task);
        }
    }
}
