//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::actors::MonitorStatus;
use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Always answers; degraded actors show up as missing fields, not errors
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let monitors_running = state
        .scheduler
        .list_monitors()
        .await
        .map(|monitors| {
            monitors
                .iter()
                .filter(|monitor| monitor.status == MonitorStatus::Running)
                .count()
        })
        .unwrap_or(0);

    let now = Utc::now();
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: now.to_rfc3339(),
        uptime_seconds: (now - state.started_at).num_seconds(),
        monitors_running,
        subscribers: state.broadcaster.subscriber_count(),
        store: state.store.get_stats().await,
    })
}
