//! Bus record handlers: what a consumer does with each record it pulls.
//!
//! The server runs these from its topic consumers; tests call them directly
//! to step the protocol one record at a time.

use std::sync::Arc;

use dispatch_contract::{DriverSearchRequest, DriverSearchResponse, RideStatus};
use tracing::{debug, error};

use crate::broadcaster::DispatchBroadcaster;
use crate::bus::BusRecord;
use crate::error::DispatchError;
use crate::gateway::RiderGateway;
use crate::matcher::GeoMatcher;
use crate::spatial::GeoPoint;

fn malformed(record: &BusRecord, err: serde_json::Error) -> DispatchError {
    error!(
        topic = %record.topic,
        key = %record.key,
        error = %err,
        "dropping malformed bus record"
    );
    DispatchError::Malformed {
        topic: record.topic.to_string(),
        reason: err.to_string(),
    }
}

/// Geo matcher side: search around the pickup and hand the candidates to the
/// broadcaster. Returns the number of drivers offered the ride.
pub async fn handle_search_request(
    matcher: &GeoMatcher,
    broadcaster: &Arc<DispatchBroadcaster>,
    offer_timeout_secs: u64,
    record: &BusRecord,
) -> Result<usize, DispatchError> {
    let request: DriverSearchRequest = record.decode().map_err(|err| malformed(record, err))?;
    let pickup = GeoPoint::new(request.pickup_lat, request.pickup_lon);
    let candidates = matcher.search(&request.request_id, pickup)?;
    debug!(
        request_id = %request.request_id,
        candidates = candidates.candidates.len(),
        "search request matched"
    );

    let intake = candidates.into_intake(&request, offer_timeout_secs);
    broadcaster.intake(intake).await
}

/// Rider gateway side.
pub async fn handle_search_response(
    gateway: &RiderGateway,
    record: &BusRecord,
) -> Result<Option<RideStatus>, DispatchError> {
    let response: DriverSearchResponse = record.decode().map_err(|err| malformed(record, err))?;
    Ok(gateway.on_search_response(response).await)
}
