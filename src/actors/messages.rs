//! Message types for actor communication
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Snapshots**: Latest-value state published through `watch` channels
//! 3. **Request/Response**: oneshot channels for synchronous queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::monitors::StatsSnapshot;
use crate::probes::ProbeError;
use crate::storage::EventQuery;
use crate::{Event, MonitorFault, MonitorId, MonitorKind};

/// Lifecycle of a monitor runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Why a runner's task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// Stop was requested
    Stopped,
    /// Too many consecutive executor crashes
    Faulted(String),
}

/// Commands that can be sent to a MonitorRunner
#[derive(Debug)]
pub enum RunnerCommand {
    /// Probe immediately, outside the regular schedule
    PollNow {
        respond_to: oneshot::Sender<Result<(), ProbeError>>,
    },
}

/// Latest known state of one monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub monitor_id: MonitorId,
    pub name: String,
    pub kind: MonitorKind,
    pub state: RunnerState,
    /// False after repeated consecutive probe failures, until the next success
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_update: Option<DateTime<Utc>>,
    pub stats: StatsSnapshot,
}

/// How a configured monitor is currently being served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Running,
    /// Stopped after repeated crashes, waiting for the next reconciliation
    Faulted,
    /// Definition cannot be run
    Rejected,
    /// Never probed (event log widget)
    Passive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorOverview {
    pub monitor_id: MonitorId,
    pub name: String,
    pub kind: MonitorKind,
    pub status: MonitorStatus,
    pub detail: Option<String>,
    pub snapshot: Option<MonitorSnapshot>,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub started: usize,
    pub stopped: usize,
    pub rejected: usize,
    pub running: usize,
}

/// Commands that can be sent to the Scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Bring running monitors in line with the catalog now
    Reconcile {
        respond_to: oneshot::Sender<ReconcileSummary>,
    },

    GetSnapshot {
        monitor_id: MonitorId,
        respond_to: oneshot::Sender<Option<MonitorSnapshot>>,
    },

    ListMonitors {
        respond_to: oneshot::Sender<Vec<MonitorOverview>>,
    },

    /// Latest fault of a monitor, if it has not been restarted since
    GetFault {
        monitor_id: MonitorId,
        respond_to: oneshot::Sender<Option<MonitorFault>>,
    },

    /// Stop every runner and exit
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the EventStore actor
#[derive(Debug)]
pub enum StoreCommand {
    Append {
        event: Event,
    },

    QueryRecent {
        limit: usize,
        respond_to: oneshot::Sender<anyhow::Result<Vec<Event>>>,
    },

    QueryRange {
        query: EventQuery,
        respond_to: oneshot::Sender<anyhow::Result<Vec<Event>>>,
    },

    Count {
        respond_to: oneshot::Sender<anyhow::Result<u64>>,
    },

    Prune {
        older_than: DateTime<Utc>,
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Retry pending appends now, ignoring backoff
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    GetStats {
        respond_to: oneshot::Sender<StoreStats>,
    },

    Shutdown,
}

/// Event store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    /// Events persisted since start
    pub appended: u64,

    /// Events waiting for the backend to recover
    pub pending: usize,

    /// Failed append attempts since start
    pub failed_attempts: u64,

    /// Events discarded because the backlog was full
    pub dropped: u64,

    /// Events removed by retention pruning
    pub pruned: u64,

    pub last_prune: Option<DateTime<Utc>>,
}
