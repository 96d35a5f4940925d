//! Driver position endpoints.
//!
//! - `POST   /api/location/update`          : report a driver position
//! - `GET    /api/location/search?lat&lon`  : drivers around a point
//! - `DELETE /api/location/{driverId}`      : driver went offline

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dispatch_contract::ValidationError;
use dispatch_core::clock::Clock;
use dispatch_core::GeoPoint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/location/update", post(update_location))
        .route("/api/location/search", get(search_nearby))
        .route("/api/location/{driver_id}", delete(remove_driver))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub driver_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Registers or renames the driver in the directory when present.
    #[serde(default)]
    pub driver_name: Option<String>,
    /// Defaults to the server clock.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAck {
    pub driver_id: String,
    /// False when a newer position was already on record.
    pub applied: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub radius_km: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyDriverView {
    pub driver_id: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_km: f64,
}

async fn update_location(
    State(state): State<AppState>,
    payload: Result<Json<LocationUpdate>, JsonRejection>,
) -> Result<(StatusCode, Json<LocationAck>), ApiError> {
    let Json(update) = payload?;
    if update.driver_id.trim().is_empty() {
        return Err(ValidationError::new("driverId cannot be empty").into());
    }

    let at = update.updated_at.unwrap_or_else(|| state.clock.now());
    let applied = state
        .index
        .upsert(&update.driver_id, GeoPoint::new(update.lat, update.lon), at)?;
    if let Some(name) = update.driver_name.filter(|name| !name.trim().is_empty()) {
        state.directory.register(update.driver_id.clone(), name);
    }
    debug!(driver_id = %update.driver_id, applied, "driver position reported");

    Ok((
        StatusCode::CREATED,
        Json(LocationAck {
            driver_id: update.driver_id,
            applied,
        }),
    ))
}

async fn search_nearby(
    State(state): State<AppState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Vec<NearbyDriverView>>, ApiError> {
    let Query(query) = query?;
    let radius_km = query.radius_km.unwrap_or(state.config.search_radius_km);
    let hits = state
        .index
        .query(GeoPoint::new(query.lat, query.lon), radius_km)?;
    Ok(Json(
        hits.into_iter()
            .map(|hit| NearbyDriverView {
                driver_id: hit.driver_id,
                lat: hit.point.lat,
                lon: hit.point.lon,
                distance_km: hit.distance_km,
            })
            .collect(),
    ))
}

async fn remove_driver(State(state): State<AppState>, Path(driver_id): Path<String>) -> StatusCode {
    match state.index.remove(&driver_id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}
