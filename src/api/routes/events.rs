//! Event history endpoints

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::MonitorId;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{EventRangeResponse, EventsResponse},
};
use crate::storage::EventQuery;

const DEFAULT_RECENT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Max results (default: 50)
    limit: Option<usize>,
}

/// Query parameters for an event time range
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    /// Start time (ISO 8601 format, default: 24 hours before `end`)
    start: Option<DateTime<Utc>>,

    /// End time (ISO 8601 format, default: now)
    end: Option<DateTime<Utc>>,

    monitor_id: Option<MonitorId>,

    limit: Option<usize>,
}

/// GET /api/v1/events
///
/// The most recent events, newest first
pub async fn recent_events(
    State(state): State<ApiState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<EventsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_LIMIT);
    let events = state.store.query_recent(limit).await?;

    Ok(Json(EventsResponse {
        count: events.len(),
        events,
    }))
}

/// GET /api/v1/events/range
///
/// Events between `start` and `end`, oldest first
pub async fn events_in_range(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<EventRangeResponse>> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or_else(|| end - Duration::hours(24));
    if start > end {
        return Err(ApiError::InvalidRequest(format!(
            "start {} is after end {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        )));
    }

    let events = state
        .store
        .query_range(EventQuery {
            monitor_id: query.monitor_id,
            start,
            end,
            limit: Some(query.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT)),
        })
        .await?;

    Ok(Json(EventRangeResponse {
        start,
        end,
        count: events.len(),
        events,
    }))
}
