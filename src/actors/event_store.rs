//! EventStore actor - serialises access to the event backend
//!
//! Appends are fire-and-forget for producers. When the backend fails, events
//! stay queued in order and are retried with exponential backoff, so a slow
//! or broken database never delays live delivery. The queue is bounded; the
//! oldest events are dropped first. Retention pruning runs at startup and on
//! a fixed interval, and a failed prune is retried with the same backoff.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{StoreCommand, StoreStats};
use crate::Event;
use crate::storage::{EventBackend, EventQuery};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const DEFAULT_MAX_PENDING_EVENTS: usize = 10_000;

/// Pruning policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub days: u32,
    pub cleanup_interval: Duration,
}

pub struct EventStoreActor {
    backend: Box<dyn EventBackend>,
    command_rx: mpsc::UnboundedReceiver<StoreCommand>,
    pending: VecDeque<Event>,
    max_pending: usize,
    retry_delay: Duration,
    retry_at: Option<Instant>,
    retention: Option<Retention>,
    cleanup_retry_delay: Duration,
    cleanup_retry_at: Option<Instant>,
    stats: StoreStats,
}

impl EventStoreActor {
    pub fn new(
        command_rx: mpsc::UnboundedReceiver<StoreCommand>,
        backend: Box<dyn EventBackend>,
        retention: Option<Retention>,
        max_pending: usize,
    ) -> Self {
        if let Some(retention) = retention {
            debug!(
                "retention: {} days, cleanup every {:?}",
                retention.days, retention.cleanup_interval
            );
        }

        Self {
            backend,
            command_rx,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            retry_delay: INITIAL_RETRY_DELAY,
            retry_at: None,
            retention,
            cleanup_retry_delay: INITIAL_RETRY_DELAY,
            cleanup_retry_at: None,
            stats: StoreStats::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting event store");

        if self.retention.is_some() {
            debug!("running initial retention cleanup on startup");
            self.run_cleanup().await;
        }

        let cleanup_period = self
            .retention
            .map(|retention| retention.cleanup_interval)
            .unwrap_or(Duration::from_secs(24 * 60 * 60))
            .clamp(MIN_CLEANUP_INTERVAL, MAX_CLEANUP_INTERVAL);
        let mut cleanup_interval =
            time::interval_at(Instant::now() + cleanup_period, cleanup_period);

        loop {
            let retry_at = self.retry_at;
            let cleanup_retry_at = self.cleanup_retry_at;

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("all store handles dropped, shutting down");
                        break;
                    };
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                _ = time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    trace!("retrying {} pending events", self.pending.len());
                    self.retry_at = None;
                    self.flush_pending().await;
                }

                _ = time::sleep_until(cleanup_retry_at.unwrap_or_else(Instant::now)), if cleanup_retry_at.is_some() => {
                    debug!("retrying failed retention cleanup");
                    self.cleanup_retry_at = None;
                    self.run_cleanup().await;
                }

                _ = cleanup_interval.tick(), if self.retention.is_some() => {
                    debug!("retention cleanup triggered");
                    self.run_cleanup().await;
                }
            }
        }

        if !self.pending.is_empty() {
            debug!("final flush before shutdown ({} events)", self.pending.len());
            self.flush_pending().await;
            if !self.pending.is_empty() {
                error!("{} events could not be persisted", self.pending.len());
            }
        }

        if let Err(e) = self.backend.close().await {
            error!("error closing backend: {}", e);
        }

        debug!("event store stopped");
    }

    /// Returns `false` when the actor should stop
    async fn handle_command(&mut self, cmd: StoreCommand) -> bool {
        match cmd {
            StoreCommand::Append { event } => {
                trace!("queueing event for monitor {}", event.monitor_id);
                if self.pending.len() >= self.max_pending {
                    self.pending.pop_front();
                    self.stats.dropped += 1;
                    warn!(
                        "event backlog full ({} events), dropped the oldest ({} dropped so far)",
                        self.max_pending, self.stats.dropped
                    );
                }
                self.pending.push_back(event);
                if self.retry_at.is_none() {
                    self.flush_pending().await;
                }
            }
            StoreCommand::QueryRecent { limit, respond_to } => {
                let result = self.backend.query_recent(limit).await.map_err(Into::into);
                let _ = respond_to.send(result);
            }
            StoreCommand::QueryRange { query, respond_to } => {
                let result = self.query_range(query).await;
                let _ = respond_to.send(result);
            }
            StoreCommand::Count { respond_to } => {
                let result = self.backend.count().await.map_err(Into::into);
                let _ = respond_to.send(result);
            }
            StoreCommand::Prune {
                older_than,
                respond_to,
            } => {
                let result = self.prune(older_than).await;
                let _ = respond_to.send(result);
            }
            StoreCommand::Flush { respond_to } => {
                self.retry_at = None;
                self.flush_pending().await;
                let result = if self.pending.is_empty() {
                    Ok(())
                } else {
                    Err(anyhow!("{} events still pending", self.pending.len()))
                };
                let _ = respond_to.send(result);
            }
            StoreCommand::GetStats { respond_to } => {
                let stats = StoreStats {
                    pending: self.pending.len(),
                    ..self.stats.clone()
                };
                let _ = respond_to.send(stats);
            }
            StoreCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }
        true
    }

    /// Writes queued events in order until the backend refuses one
    async fn flush_pending(&mut self) {
        while let Some(event) = self.pending.front() {
            match self.backend.append(event.clone()).await {
                Ok(id) => {
                    trace!("persisted event {id}");
                    self.pending.pop_front();
                    self.stats.appended += 1;
                    self.retry_delay = INITIAL_RETRY_DELAY;
                }
                Err(e) => {
                    self.stats.failed_attempts += 1;
                    warn!(
                        "event store unavailable ({} pending), retrying in {:?}: {}",
                        self.pending.len(),
                        self.retry_delay,
                        e
                    );
                    self.retry_at = Some(Instant::now() + self.retry_delay);
                    self.retry_delay = (self.retry_delay * 2).min(MAX_RETRY_DELAY);
                    return;
                }
            }
        }
    }

    async fn query_range(&self, query: EventQuery) -> anyhow::Result<Vec<Event>> {
        if query.start > query.end {
            return Err(anyhow!("start must not be after end"));
        }
        Ok(self.backend.query_range(query).await?)
    }

    async fn prune(&mut self, older_than: chrono::DateTime<Utc>) -> anyhow::Result<usize> {
        let deleted = self.backend.prune(older_than).await?;
        self.stats.pruned += deleted as u64;
        self.stats.last_prune = Some(Utc::now());
        Ok(deleted)
    }

    async fn run_cleanup(&mut self) {
        let Some(retention) = self.retention else {
            return;
        };
        let cutoff = chrono::Duration::try_days(i64::from(retention.days))
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(older_than) = cutoff else {
            warn!(
                "retention of {} days reaches past the earliest timestamp, nothing to prune",
                retention.days
            );
            return;
        };

        match self.prune(older_than).await {
            Ok(deleted) => {
                self.cleanup_retry_delay = INITIAL_RETRY_DELAY;
                info!(
                    "retention cleanup removed {deleted} events older than {} days",
                    retention.days
                );
            }
            Err(e) => {
                error!(
                    "retention cleanup failed, retrying in {:?}: {e}",
                    self.cleanup_retry_delay
                );
                self.cleanup_retry_at = Some(Instant::now() + self.cleanup_retry_delay);
                self.cleanup_retry_delay = (self.cleanup_retry_delay * 2).min(MAX_RETRY_DELAY);
            }
        }
    }
}

/// Handle for the EventStore actor
#[derive(Clone)]
pub struct StoreHandle {
    sender: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    pub fn spawn(backend: Box<dyn EventBackend>, retention: Option<Retention>) -> Self {
        Self::spawn_with_capacity(backend, retention, DEFAULT_MAX_PENDING_EVENTS)
    }

    /// Like [`StoreHandle::spawn`], keeping at most `max_pending` unwritten
    /// events during a backend outage
    pub fn spawn_with_capacity(
        backend: Box<dyn EventBackend>,
        retention: Option<Retention>,
        max_pending: usize,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = EventStoreActor::new(cmd_rx, backend, retention, max_pending);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Queues an event for persistence. Never waits.
    pub fn append(&self, event: Event) {
        if self.sender.send(StoreCommand::Append { event }).is_err() {
            error!("event store is gone, dropping event");
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> anyhow::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .map_err(|_| anyhow!("event store is not running"))?;
        Ok(rx.await?)
    }

    /// The `limit` most recent events, newest first
    pub async fn query_recent(&self, limit: usize) -> anyhow::Result<Vec<Event>> {
        self.request(|respond_to| StoreCommand::QueryRecent { limit, respond_to })
            .await?
    }

    pub async fn query_range(&self, query: EventQuery) -> anyhow::Result<Vec<Event>> {
        self.request(|respond_to| StoreCommand::QueryRange { query, respond_to })
            .await?
    }

    pub async fn count(&self) -> anyhow::Result<u64> {
        self.request(|respond_to| StoreCommand::Count { respond_to })
            .await?
    }

    pub async fn prune(&self, older_than: chrono::DateTime<Utc>) -> anyhow::Result<usize> {
        self.request(|respond_to| StoreCommand::Prune {
            older_than,
            respond_to,
        })
        .await?
    }

    /// Retries pending appends immediately; fails if some remain queued
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.request(|respond_to| StoreCommand::Flush { respond_to })
            .await?
    }

    pub async fn get_stats(&self) -> Option<StoreStats> {
        self.request(|respond_to| StoreCommand::GetStats { respond_to })
            .await
            .ok()
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender
            .send(StoreCommand::Shutdown)
            .map_err(|_| anyhow!("event store is not running"))?;
        Ok(())
    }
}
