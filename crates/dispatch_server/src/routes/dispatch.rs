//! Broadcaster endpoints.
//!
//! - `POST /api/dispatch/send`                 : hand a candidate list to the broadcaster
//! - `POST /api/dispatch/driver-response`      : a driver's ACCEPT or REJECT
//! - `GET  /api/dispatch/status/{requestId}`   : broadcaster-local status

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dispatch_contract::{DispatchIntake, DispatchStatusResponse, DriverResponse};
use dispatch_core::ResponseOutcome;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dispatch/send", post(send_to_drivers))
        .route("/api/dispatch/driver-response", post(driver_response))
        .route("/api/dispatch/status/{request_id}", get(dispatch_status))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub request_id: String,
    pub notified_drivers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverResponseAck {
    pub request_id: String,
    pub driver_id: String,
    pub outcome: ResponseOutcome,
}

async fn send_to_drivers(
    State(state): State<AppState>,
    payload: Result<Json<DispatchIntake>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(intake) = payload?;
    let request_id = intake.request_id.clone();
    let notified_drivers = state.broadcaster.intake(intake).await?;
    Ok(Json(SendResponse {
        request_id,
        notified_drivers,
    }))
}

/// Losing the race is not an error: the driver gets `ALREADY_RESOLVED` with 200.
async fn driver_response(
    State(state): State<AppState>,
    payload: Result<Json<DriverResponse>, JsonRejection>,
) -> Result<Json<DriverResponseAck>, ApiError> {
    let Json(response) = payload?;
    let request_id = response.request_id.clone();
    let driver_id = response.driver_id.clone();
    let outcome = state.broadcaster.on_driver_response(response).await?;
    Ok(Json(DriverResponseAck {
        request_id,
        driver_id,
        outcome,
    }))
}

async fn dispatch_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Json<DispatchStatusResponse> {
    Json(state.broadcaster.status(&request_id))
}
