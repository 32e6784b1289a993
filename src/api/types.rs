//! API response types

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Event;
use crate::actors::{MonitorOverview, StoreStats};

/// GET /api/v1/health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,

    /// RFC 3339 timestamp
    pub timestamp: String,

    pub uptime_seconds: i64,

    pub monitors_running: usize,

    /// Connected live-feed subscribers
    pub subscribers: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreStats>,
}

/// GET /api/v1/monitors
#[derive(Debug, Clone, Serialize)]
pub struct MonitorsResponse {
    pub count: usize,
    pub monitors: Vec<MonitorOverview>,
}

/// GET /api/v1/events
#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub count: usize,
    pub events: Vec<Event>,
}

/// GET /api/v1/events/range
#[derive(Debug, Clone, Serialize)]
pub struct EventRangeResponse {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    pub events: Vec<Event>,
}
