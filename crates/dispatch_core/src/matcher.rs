use std::sync::Arc;

use dispatch_contract::{DispatchIntake, DriverLocation, DriverSearchRequest};
use serde::Serialize;

use crate::spatial::{DriverGeoIndex, GeoPoint, SpatialError};

/// A driver inside the search radius of a pickup point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverCandidate {
    pub driver_id: String,
    pub location: GeoPoint,
    pub distance_km: f64,
}

impl DriverCandidate {
    pub fn to_location(&self) -> DriverLocation {
        DriverLocation {
            driver_id: self.driver_id.clone(),
            lat: self.location.lat,
            lon: self.location.lon,
        }
    }
}

/// Result of one geo search. An empty candidate list means "no drivers nearby".
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResponse {
    pub request_id: String,
    pub candidates: Vec<DriverCandidate>,
}

impl CandidateResponse {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Build the broadcaster hand-off for this result.
    pub fn into_intake(self, request: &DriverSearchRequest, timeout_seconds: u64) -> DispatchIntake {
        let drivers: Vec<DriverLocation> =
            self.candidates.iter().map(DriverCandidate::to_location).collect();
        DispatchIntake {
            request_id: self.request_id,
            user_id: request.user_id.clone(),
            pickup_lat: request.pickup_lat,
            pickup_lon: request.pickup_lon,
            dropoff_lat: request.dropoff_lat,
            dropoff_lon: request.dropoff_lon,
            price: request.price,
            driver_ids: drivers.iter().map(|d| d.driver_id.clone()).collect(),
            drivers,
            timeout_seconds: Some(timeout_seconds),
            expires_at: request.expires_at,
        }
    }
}

/// Finds candidate drivers around a pickup point.
pub struct GeoMatcher {
    index: Arc<DriverGeoIndex>,
    radius_km: f64,
    max_candidates: Option<usize>,
}

impl GeoMatcher {
    pub fn new(index: Arc<DriverGeoIndex>, radius_km: f64, max_candidates: Option<usize>) -> Self {
        Self {
            index,
            radius_km,
            max_candidates,
        }
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    pub fn search(&self, request_id: &str, pickup: GeoPoint) -> Result<CandidateResponse, SpatialError> {
        let mut candidates: Vec<DriverCandidate> = self
            .index
            .query(pickup, self.radius_km)?
            .into_iter()
            .map(|hit| DriverCandidate {
                driver_id: hit.driver_id,
                location: hit.point,
                distance_km: hit.distance_km,
            })
            .collect();

        if let Some(limit) = self.max_candidates {
            candidates.truncate(limit);
        }

        tracing::debug!(
            request_id,
            candidates = candidates.len(),
            radius_km = self.radius_km,
            "geo search completed"
        );

        Ok(CandidateResponse {
            request_id: request_id.to_string(),
            candidates,
        })
    }
}
