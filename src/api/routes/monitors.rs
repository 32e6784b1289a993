//! Monitor state endpoints

use axum::{
    Json,
    extract::{Path, State},
};

use crate::MonitorId;
use crate::actors::MonitorSnapshot;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::MonitorsResponse,
};

/// GET /api/v1/monitors
///
/// Every configured monitor with its run state (running, faulted, rejected
/// or passive) and latest snapshot
pub async fn list_monitors(State(state): State<ApiState>) -> ApiResult<Json<MonitorsResponse>> {
    let monitors = state.scheduler.list_monitors().await?;

    Ok(Json(MonitorsResponse {
        count: monitors.len(),
        monitors,
    }))
}

/// GET /api/v1/monitors/:id/snapshot
pub async fn get_snapshot(
    State(state): State<ApiState>,
    Path(monitor_id): Path<MonitorId>,
) -> ApiResult<Json<MonitorSnapshot>> {
    state
        .scheduler
        .snapshot(monitor_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("monitor {monitor_id} is not running")))
}
