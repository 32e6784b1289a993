//! In-memory event backend (no persistence)
//!
//! Used when no database is configured and in tests. All events are lost on
//! restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{EventBackend, EventQuery, HealthStatus};
use super::error::{StorageError, StorageResult};
use crate::Event;

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<Event>,
    next_id: i64,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct MemoryEventBackend {
    state: Mutex<MemoryState>,
}

impl MemoryEventBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBackend for MemoryEventBackend {
    async fn append(&self, mut event: Event) -> StorageResult<i64> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(StorageError::Unavailable("backend closed".to_string()));
        }
        state.next_id += 1;
        let id = state.next_id;
        event.id = Some(id);
        state.events.push(event);
        Ok(id)
    }

    async fn query_range(&self, query: EventQuery) -> StorageResult<Vec<Event>> {
        let state = self.state.lock().await;
        let events = state
            .events
            .iter()
            .filter(|event| event.timestamp >= query.start && event.timestamp <= query.end)
            .filter(|event| query.monitor_id.is_none_or(|id| event.monitor_id == id))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(events)
    }

    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<Event>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().rev().take(limit).cloned().collect())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|event| event.timestamp >= older_than);
        let deleted = before - state.events.len();
        debug!("pruned {deleted} in-memory events");
        Ok(deleted)
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(self.state.lock().await.events.len() as u64)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.lock().await;
        Ok(HealthStatus {
            healthy: !state.closed,
            message: "In-memory event log operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("events".to_string(), state.events.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend");
        self.state.lock().await.closed = true;
        Ok(())
    }
}
