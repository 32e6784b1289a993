//! API shared state containing actor handles

use chrono::{DateTime, Utc};

use crate::actors::{SchedulerHandle, StoreHandle};
use crate::broadcaster::Broadcaster;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Monitor overview, snapshots and fault state
    pub scheduler: SchedulerHandle,

    /// Persisted events
    pub store: StoreHandle,

    /// Live feed for WebSocket streaming
    pub broadcaster: Broadcaster,

    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(scheduler: SchedulerHandle, store: StoreHandle, broadcaster: Broadcaster) -> Self {
        Self {
            scheduler,
            store,
            broadcaster,
            started_at: Utc::now(),
        }
    }
}
