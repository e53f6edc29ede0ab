//! Health, statistics and metrics endpoints.

use axum::extract::{Json, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use ipbanner_core::{BannerStats, State as EngineState};

use crate::state::AppState;
use crate::types::HealthResponse;

/// Server health. 503 unless the engine is running.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let engine_state = state.state();
    let (code, status) = if engine_state == EngineState::Running {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: engine_state,
            uptime_seconds: state.uptime_secs(),
        }),
    )
}

/// Engine settings and counters as JSON.
pub async fn stats(State(state): State<AppState>) -> Json<BannerStats> {
    Json(state.stats())
}

/// Prometheus metrics.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.render_metrics(),
    )
}
