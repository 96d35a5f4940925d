//! Rider-facing endpoints.
//!
//! - `POST /api/ride-requests`             : submit a ride request
//! - `GET  /api/ride-requests/{requestId}` : current status of a request

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dispatch_contract::{CreateRideRequest, RideStatusResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/ride-requests", post(create_ride_request))
        .route("/api/ride-requests/{request_id}", get(ride_status))
}

/// Answers as soon as the search request is on the bus; progress arrives on
/// the rider channel or through the status endpoint.
async fn create_ride_request(
    State(state): State<AppState>,
    payload: Result<Json<CreateRideRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RideStatusResponse>), ApiError> {
    let Json(request) = payload?;
    let response = state.gateway.initiate(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn ride_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Json<RideStatusResponse> {
    Json(state.gateway.status(&request_id))
}
