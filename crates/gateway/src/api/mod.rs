//! HTTP control surface: liveness, readiness, and the full health report.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/health/detail", get(health_detail))
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health — lightweight liveness probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /ready — readiness gate with per-component checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.lifecycle.ready() && state.heartbeat.required_passing();
    let body = serde_json::json!({
        "ready": ready,
        "shutting_down": state.lifecycle.is_shutting_down(),
        "overall": state.heartbeat.overall_status(),
        "components": state.heartbeat.report(),
    });
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health/detail — full report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn health_detail(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "overall": state.heartbeat.overall_status(),
        "probes": state.heartbeat.report(),
        "gateway": state.gateway.stats(),
        "fleet": state.fleet.stats(),
        "queue": state.queue.stats(),
        "sessions": {
            "live": state.sessions.live_count(),
            "archived": state.sessions.archived_count(),
        },
        "channels": state.router.channel_count(),
        "drafts_active": state.streamer.active_count(),
    }))
}
