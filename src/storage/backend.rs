//! Event backend trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::{Event, MonitorId};

/// Time range query over the event log
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Restrict to one monitor
    pub monitor_id: Option<MonitorId>,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub metadata: std::collections::HashMap<String, String>,
}

/// Durable, append-mostly log of anomaly events
///
/// Appends from one task are applied in call order. Implementations must be
/// `Send + Sync`; the store actor shares them across its queries.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Persists one event and returns its assigned id
    async fn append(&self, event: Event) -> StorageResult<i64>;

    /// Events in `[start, end]`, oldest first
    async fn query_range(&self, query: EventQuery) -> StorageResult<Vec<Event>>;

    /// The `limit` most recent events, newest first
    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<Event>>;

    /// Deletes events older than `older_than`, returning how many were removed
    async fn prune(&self, older_than: DateTime<Utc>) -> StorageResult<usize>;

    async fn count(&self) -> StorageResult<u64>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Releases resources. Later calls fail with `Unavailable`.
    async fn close(&self) -> StorageResult<()>;
}
