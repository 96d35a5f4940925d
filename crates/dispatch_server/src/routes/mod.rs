pub mod dispatch;
pub mod location;
pub mod rides;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use dispatch_core::telemetry::TelemetrySnapshot;

use crate::state::AppState;

/// Health check and counters.
pub fn ops_router() -> Router<AppState> {
    Router::new()
        .route("/health/liveness", get(liveness))
        .route("/api/telemetry", get(telemetry))
}

async fn liveness() -> &'static str {
    "ok"
}

async fn telemetry(State(state): State<AppState>) -> Json<TelemetrySnapshot> {
    Json(state.telemetry.snapshot())
}
