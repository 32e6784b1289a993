//! Actor-based monitoring engine
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   MonitorCatalog ──changes──▶ Scheduler
//!                                   │ spawns / stops
//!                 ┌─────────────────┼─────────────────┐
//!                 ▼                 ▼                 ▼
//!          MonitorRunner-1   MonitorRunner-2   MonitorRunner-N
//!                 │                 │                 │
//!                 └────────┬────────┴────────┬────────┘
//!                          ▼                 ▼
//!                     Broadcaster       EventStore
//!                   (live feed, WS)   (persisted events)
//! ```
//!
//! ## Actor Types
//!
//! - **Scheduler**: Reconciles running monitors against the catalog
//! - **MonitorRunner**: Probes one target at its interval, derives stats and events
//! - **EventStoreActor**: Persists events with retry and retention pruning
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Snapshots**: Runners publish their latest state through watch channels
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod event_store;
pub mod messages;
pub mod runner;
pub mod scheduler;

pub use event_store::{Retention, StoreHandle};
pub use messages::{
    MonitorOverview, MonitorSnapshot, MonitorStatus, ReconcileSummary, RunnerExit, RunnerState,
    StoreStats,
};
pub use runner::{RunnerExitReport, RunnerHandle, RunnerSinks};
pub use scheduler::SchedulerHandle;
