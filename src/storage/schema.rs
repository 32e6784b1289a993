//! Row layout of the `events` table
//!
//! Timestamps are stored as Unix milliseconds so that range scans and
//! retention deletes can use the `timestamp` index directly.

use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use crate::{Event, MonitorId};

/// A single event as stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub id: Option<i64>,
    pub monitor_id: MonitorId,
    pub event_type: String,
    pub timestamp_ms: i64,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
}

impl EventRow {
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.id,
            monitor_id: event.monitor_id,
            event_type: event.event_type.as_str().to_string(),
            timestamp_ms: event.timestamp.timestamp_millis(),
            message: event.message.clone(),
            value: event.value,
            threshold: event.threshold,
        }
    }

    pub fn into_event(self) -> StorageResult<Event> {
        let event_type = self
            .event_type
            .parse()
            .map_err(StorageError::SerializationError)?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms).ok_or_else(
            || StorageError::SerializationError(format!("timestamp {} out of range", self.timestamp_ms)),
        )?;

        Ok(Event {
            id: self.id,
            monitor_id: self.monitor_id,
            event_type,
            timestamp,
            message: self.message,
            value: self.value,
            threshold: self.threshold,
        })
    }
}
