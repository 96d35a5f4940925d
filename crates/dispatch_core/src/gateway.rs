//! Rider gateway: owns a ride request from intake until it resolves.
//!
//! A request is `SEARCHING` until the first non-empty search result arrives,
//! `DRIVER_FOUND` while offers are out, and then ends in exactly one terminal
//! status. The terminal transition is claimed by removing the pending entry;
//! whoever removes it acts, everybody else sees a late message and drops it.
//!
//! A request whose TTL passes moves to the lapsed set: the rider reads
//! NOT_FOUND, but a late ACCEPT or TIMEOUT still claims it. The sweep closes
//! lapsed requests nobody answered as TIMEOUT once the outcome grace is over.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dispatch_contract::{
    validate_create_ride_request, CreateRideRequest, DriverInfo, DriverLocation,
    DriverSearchRequest, DriverSearchResponse, ResponseKind, RideStatus,
    RideStatusResponse, RiderNotification,
};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::booking::{BookingMaterializer, BookingRequest};
use crate::bus::{publish_within, MessageBus, Topic};
use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::directory::{DriverDirectory, UNKNOWN_DRIVER_NAME};
use crate::error::{BusError, DispatchError};
use crate::matcher::DriverCandidate;
use crate::notify::Notifier;
use crate::pricing::PricingConfig;
use crate::spatial::{haversine_km, GeoPoint};
use crate::telemetry::DispatchTelemetry;

/// One active ride search.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRideRequest {
    pub request_id: String,
    pub user_id: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_time: Option<DateTime<Utc>>,
    pub estimated_price: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What an inbound search response means for the request it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    SearchResult,
    Acceptance,
    Timeout,
    NoDrivers,
    /// Tagged acceptance that does not carry exactly one driver.
    Malformed,
}

/// Decide what a response means.
///
/// An explicit `messageType` wins. Untagged messages fall back to the shape
/// rule: an empty list is a timeout when a candidate set already exists and
/// "no drivers" otherwise; a single driver after a candidate set is an
/// acceptance; anything else is a search result.
pub fn classify(response: &DriverSearchResponse, has_candidate_set: bool) -> InboundEvent {
    let count = response.drivers.len();
    match response.message_type {
        Some(ResponseKind::SearchResult) if count == 0 => InboundEvent::NoDrivers,
        Some(ResponseKind::SearchResult) => InboundEvent::SearchResult,
        Some(ResponseKind::Acceptance) if count == 1 => InboundEvent::Acceptance,
        Some(ResponseKind::Acceptance) => InboundEvent::Malformed,
        Some(ResponseKind::Timeout) => InboundEvent::Timeout,
        Some(ResponseKind::NoDrivers) => InboundEvent::NoDrivers,
        None if count == 0 && has_candidate_set => InboundEvent::Timeout,
        None if count == 0 => InboundEvent::NoDrivers,
        None if count == 1 && has_candidate_set => InboundEvent::Acceptance,
        None => InboundEvent::SearchResult,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Outcome {
    user_id: String,
    status: RideStatus,
    driver_id: Option<String>,
    booking_id: Option<u64>,
    estimated_price: f64,
}

/// What one [`RiderGateway::sweep_expired`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Requests whose TTL passed and that now read as NOT_FOUND.
    pub lapsed: usize,
    /// Lapsed requests closed as TIMEOUT after the outcome grace.
    pub closed: usize,
}

/// Collaborators the gateway talks to.
#[derive(Clone)]
pub struct GatewayDeps {
    pub bus: Arc<dyn MessageBus>,
    pub notifier: Arc<dyn Notifier>,
    pub directory: Arc<dyn DriverDirectory>,
    pub bookings: Arc<dyn BookingMaterializer>,
    pub clock: Arc<dyn Clock>,
    pub telemetry: Arc<DispatchTelemetry>,
}

pub struct RiderGateway {
    pending: DashMap<String, PendingRideRequest>,
    /// Past their TTL but still waiting on a terminal answer.
    lapsed: DashMap<String, PendingRideRequest>,
    /// CandidateSet per request, written once by the first non-empty result.
    candidates: DashMap<String, Vec<DriverCandidate>>,
    /// Terminal outcomes kept after cleanup so `status` can still answer.
    outcomes: Mutex<LruCache<String, Outcome>>,
    deps: GatewayDeps,
    pricing: PricingConfig,
    request_ttl: chrono::Duration,
    outcome_grace: chrono::Duration,
    send_timeout: Duration,
}

impl RiderGateway {
    pub fn new(config: &DispatchConfig, deps: GatewayDeps) -> Self {
        let capacity = NonZeroUsize::new(config.outcome_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: DashMap::new(),
            lapsed: DashMap::new(),
            candidates: DashMap::new(),
            outcomes: Mutex::new(LruCache::new(capacity)),
            deps,
            pricing: config.pricing,
            request_ttl: config.request_ttl(),
            outcome_grace: config.outcome_grace(),
            send_timeout: config.send_timeout(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn lapsed_count(&self) -> usize {
        self.lapsed.len()
    }

    pub fn candidate_set_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn pending_request(&self, request_id: &str) -> Option<PendingRideRequest> {
        self.pending.get(request_id).map(|entry| entry.value().clone())
    }

    /// Accept a rider's request, quote a price and ask the matcher for drivers.
    ///
    /// Returns as soon as the search request is on the bus. If the bus does not
    /// take it within the send timeout the pending request is rolled back and
    /// the failure is returned; nothing is retried.
    pub async fn initiate(
        &self,
        request: CreateRideRequest,
    ) -> Result<RideStatusResponse, DispatchError> {
        validate_create_ride_request(&request)?;

        let request_id = Uuid::new_v4().to_string();
        let pickup = GeoPoint::new(request.pickup_lat, request.pickup_lon);
        let dropoff = GeoPoint::new(request.dropoff_lat, request.dropoff_lon);
        let estimated_price = self.pricing.estimate_price(pickup, dropoff);
        let created_at = self.deps.clock.now();
        let expires_at = created_at + self.request_ttl;

        self.pending.insert(
            request_id.clone(),
            PendingRideRequest {
                request_id: request_id.clone(),
                user_id: request.user_id.clone(),
                pickup,
                dropoff,
                pickup_time: request.pickup_time,
                estimated_price,
                created_at,
                expires_at,
            },
        );
        self.deps.telemetry.request_initiated();
        info!(
            request_id = %request_id,
            user_id = %request.user_id,
            estimated_price,
            "ride request initiated"
        );

        let search = DriverSearchRequest {
            request_id: request_id.clone(),
            user_id: request.user_id.clone(),
            pickup_lat: pickup.lat,
            pickup_lon: pickup.lon,
            dropoff_lat: dropoff.lat,
            dropoff_lon: dropoff.lon,
            price: estimated_price,
            expires_at: Some(expires_at.timestamp_millis()),
        };
        if let Err(err) = self.send_search(&search).await {
            self.pending.remove(&request_id);
            self.deps.telemetry.send_failed();
            error!(request_id = %request_id, error = %err, "driver search request not sent, rolled back");
            return Err(err.into());
        }

        let mut response = RideStatusResponse::new(request_id, RideStatus::Searching);
        response.user_id = Some(request.user_id);
        response.estimated_price = Some(estimated_price);
        Ok(response)
    }

    async fn send_search(&self, search: &DriverSearchRequest) -> Result<(), BusError> {
        publish_within(
            self.deps.bus.as_ref(),
            Topic::DriverSearchRequest,
            &search.request_id,
            search,
            self.send_timeout,
        )
        .await
    }

    /// Single entry point for everything arriving on the search-response topic.
    ///
    /// Returns the status the request moved to, or `None` if the message was
    /// dropped (late, duplicate or malformed).
    pub async fn on_search_response(&self, response: DriverSearchResponse) -> Option<RideStatus> {
        let event = classify(&response, self.candidates.contains_key(&response.request_id));
        debug!(
            request_id = %response.request_id,
            drivers = response.drivers.len(),
            tagged = response.message_type.is_some(),
            ?event,
            "search response classified"
        );

        let transition = match event {
            InboundEvent::SearchResult => self.store_candidates(&response),
            InboundEvent::Acceptance => match response.drivers.first() {
                Some(driver) => self.accept(response.request_id.clone(), driver).await,
                None => None,
            },
            InboundEvent::Timeout => self.finish_unmatched(&response.request_id, RideStatus::Timeout),
            InboundEvent::NoDrivers => {
                self.finish_unmatched(&response.request_id, RideStatus::NoDrivers)
            }
            InboundEvent::Malformed => {
                warn!(
                    request_id = %response.request_id,
                    drivers = response.drivers.len(),
                    "acceptance must name exactly one driver, dropping"
                );
                None
            }
        };
        if transition.is_none() {
            self.deps.telemetry.message_ignored();
        }
        transition
    }

    fn store_candidates(&self, response: &DriverSearchResponse) -> Option<RideStatus> {
        let request_id = response.request_id.as_str();
        // Holding the pending entry keeps a concurrent terminal transition from
        // removing the request between the check and the insert.
        let Some(pending) = self.pending.get(request_id) else {
            debug!(request_id, "search result for unknown request, dropping");
            return None;
        };

        let stored = match self.candidates.entry(request_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let set: Vec<DriverCandidate> = response
                    .drivers
                    .iter()
                    .map(|driver| candidate_for(pending.pickup, driver))
                    .collect();
                slot.insert(set);
                true
            }
        };
        drop(pending);

        if !stored {
            debug!(request_id, "candidate set already stored, dropping duplicate result");
            return None;
        }

        let count = response.drivers.len();
        self.deps.telemetry.candidate_set_stored();
        info!(request_id, drivers = count, "candidate set stored");
        self.deps
            .notifier
            .notify_rider(request_id, RiderNotification::drivers_found(request_id, count));
        Some(RideStatus::DriverFound)
    }

    /// Remove the pending or lapsed request and record its terminal outcome in
    /// one step, so `status` never sees the request as neither open nor resolved.
    fn claim(
        &self,
        request_id: &str,
        status: RideStatus,
        driver_id: Option<&str>,
    ) -> Option<PendingRideRequest> {
        let record = |_: &String, pending: &PendingRideRequest| {
            self.record_outcome(request_id, pending, status, driver_id);
            true
        };
        // Lapsing inserts into `lapsed` before releasing the pending entry, so
        // checking pending first cannot miss a request that is mid-move.
        let (_, pending) = self
            .pending
            .remove_if(request_id, record)
            .or_else(|| self.lapsed.remove_if(request_id, record))?;
        self.candidates.remove(request_id);
        Some(pending)
    }

    fn record_outcome(
        &self,
        request_id: &str,
        pending: &PendingRideRequest,
        status: RideStatus,
        driver_id: Option<&str>,
    ) {
        self.outcomes.lock().put(
            request_id.to_string(),
            Outcome {
                user_id: pending.user_id.clone(),
                status,
                driver_id: driver_id.map(str::to_string),
                booking_id: None,
                estimated_price: pending.estimated_price,
            },
        );
    }

    fn finish_unmatched(&self, request_id: &str, status: RideStatus) -> Option<RideStatus> {
        if self.claim(request_id, status, None).is_none() {
            debug!(request_id, ?status, "request already resolved, dropping");
            return None;
        }

        let notification = if status == RideStatus::Timeout {
            self.deps.telemetry.timed_out();
            warn!(request_id, "ride request timed out without acceptance");
            RiderNotification::timeout(request_id)
        } else {
            self.deps.telemetry.no_drivers();
            warn!(request_id, "no drivers found for ride request");
            RiderNotification::no_drivers(request_id)
        };
        self.deps.notifier.notify_rider(request_id, notification);
        Some(status)
    }

    async fn accept(&self, request_id: String, driver: &DriverLocation) -> Option<RideStatus> {
        let driver_id = driver.driver_id.as_str();
        let Some(pending) = self.claim(&request_id, RideStatus::Accepted, Some(driver_id)) else {
            debug!(request_id = %request_id, driver_id, "acceptance for resolved request, dropping");
            return None;
        };
        self.deps.telemetry.accepted();
        info!(request_id = %request_id, driver_id, "driver acceptance received");

        if !self.deps.directory.contains(driver_id) {
            error!(
                request_id = %request_id,
                driver_id,
                "accepted driver has no directory record, continuing with booking"
            );
        }

        let booking = BookingRequest {
            request_id: request_id.clone(),
            user_id: pending.user_id.clone(),
            driver_id: driver_id.to_string(),
            price: pending.estimated_price,
            pickup: pending.pickup,
            dropoff: pending.dropoff,
            pickup_time: pending.pickup_time,
        };

        match self.deps.bookings.materialize(booking).await {
            Ok(receipt) => {
                self.update_outcome(&request_id, &pending, |outcome| {
                    outcome.booking_id = Some(receipt.booking_id);
                });
                self.deps.telemetry.booking_confirmed();
                info!(
                    request_id = %request_id,
                    driver_id,
                    booking_id = receipt.booking_id,
                    "ride confirmed"
                );
                self.deps.notifier.notify_rider(
                    &request_id,
                    RiderNotification::booking_confirmed(&request_id, receipt.booking_id, driver_id),
                );
                Some(RideStatus::Accepted)
            }
            Err(err) => {
                self.update_outcome(&request_id, &pending, |outcome| {
                    outcome.status = RideStatus::BookingFailed;
                });
                self.deps.telemetry.booking_failed();
                error!(request_id = %request_id, driver_id, error = %err, "booking handoff failed");
                self.deps.notifier.notify_rider(
                    &request_id,
                    RiderNotification::booking_failed(&request_id, driver_id),
                );
                Some(RideStatus::BookingFailed)
            }
        }
    }

    fn update_outcome(
        &self,
        request_id: &str,
        pending: &PendingRideRequest,
        apply: impl FnOnce(&mut Outcome),
    ) {
        let mut outcomes = self.outcomes.lock();
        let outcome = outcomes.get_or_insert_mut(request_id.to_string(), || Outcome {
            user_id: pending.user_id.clone(),
            status: RideStatus::Accepted,
            driver_id: None,
            booking_id: None,
            estimated_price: pending.estimated_price,
        });
        apply(outcome);
    }

    /// Current view of a request for the rider.
    pub fn status(&self, request_id: &str) -> RideStatusResponse {
        let now = self.deps.clock.now();
        let mut expired = false;

        if let Some(pending) = self.pending.get(request_id) {
            if now > pending.expires_at {
                expired = true;
            } else {
                let drivers: Vec<DriverInfo> = self
                    .candidates
                    .get(request_id)
                    .map(|set| set.iter().map(|c| self.driver_info(c)).collect())
                    .unwrap_or_default();
                let status = if drivers.is_empty() {
                    RideStatus::Searching
                } else {
                    RideStatus::DriverFound
                };
                let mut response = RideStatusResponse::new(request_id, status);
                response.user_id = Some(pending.user_id.clone());
                response.estimated_price = Some(pending.estimated_price);
                response.drivers = drivers;
                return response;
            }
        }

        if expired {
            self.lapse(request_id, now);
            return RideStatusResponse::not_found(request_id);
        }
        if self.lapsed.contains_key(request_id) {
            return RideStatusResponse::not_found(request_id);
        }

        let outcome = self.outcomes.lock().get(request_id).cloned();
        match outcome {
            Some(outcome) => {
                let mut response = RideStatusResponse::new(request_id, outcome.status);
                response.user_id = Some(outcome.user_id);
                response.driver_id = outcome.driver_id;
                response.booking_id = outcome.booking_id;
                response.estimated_price = Some(outcome.estimated_price);
                response
            }
            None => RideStatusResponse::not_found(request_id),
        }
    }

    fn driver_info(&self, candidate: &DriverCandidate) -> DriverInfo {
        DriverInfo {
            driver_id: candidate.driver_id.clone(),
            driver_name: self
                .deps
                .directory
                .display_name(&candidate.driver_id)
                .unwrap_or_else(|| UNKNOWN_DRIVER_NAME.to_string()),
            lat: candidate.location.lat,
            lon: candidate.location.lon,
            distance_km: candidate.distance_km,
        }
    }

    /// Move a request past its TTL from pending to lapsed. The candidate set
    /// stays so late untagged answers still classify against it.
    fn lapse(&self, request_id: &str, now: DateTime<Utc>) -> bool {
        let moved = self
            .pending
            .remove_if(request_id, |key, pending| {
                if now <= pending.expires_at {
                    return false;
                }
                self.lapsed.insert(key.clone(), pending.clone());
                true
            })
            .is_some();
        if moved {
            debug!(request_id, "pending ride request passed its TTL");
        }
        moved
    }

    /// Close a lapsed request nobody answered within the outcome grace.
    fn close_lapsed(&self, request_id: &str, now: DateTime<Utc>) -> bool {
        let closed = self.lapsed.remove_if(request_id, |_, pending| {
            if now <= pending.expires_at + self.outcome_grace {
                return false;
            }
            self.record_outcome(request_id, pending, RideStatus::Timeout, None);
            true
        });
        if closed.is_none() {
            return false;
        }
        self.candidates.remove(request_id);
        self.deps.telemetry.timed_out();
        warn!(request_id, "no terminal answer within the outcome grace, closing as timeout");
        self.deps
            .notifier
            .notify_rider(request_id, RiderNotification::timeout(request_id));
        true
    }

    /// Lapse every pending request whose TTL has passed and close lapsed
    /// requests whose outcome grace is over.
    pub fn sweep_expired(&self) -> SweepStats {
        let now = self.deps.clock.now();
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| now > entry.expires_at)
            .map(|entry| entry.key().clone())
            .collect();
        let lapsed = stale.iter().filter(|id| self.lapse(id, now)).count();

        let overdue: Vec<String> = self
            .lapsed
            .iter()
            .filter(|entry| now > entry.expires_at + self.outcome_grace)
            .map(|entry| entry.key().clone())
            .collect();
        let closed = overdue.iter().filter(|id| self.close_lapsed(id, now)).count();

        if lapsed > 0 || closed > 0 {
            info!(lapsed, closed, "swept expired ride requests");
        }
        SweepStats { lapsed, closed }
    }
}

fn candidate_for(pickup: GeoPoint, driver: &DriverLocation) -> DriverCandidate {
    let location = GeoPoint::new(driver.lat, driver.lon);
    DriverCandidate {
        driver_id: driver.driver_id.clone(),
        location,
        distance_km: haversine_km(pickup, location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(drivers: usize, message_type: Option<ResponseKind>) -> DriverSearchResponse {
        DriverSearchResponse {
            request_id: "req-1".to_string(),
            user_id: "user-1".to_string(),
            drivers: (0..drivers)
                .map(|i| DriverLocation {
                    driver_id: format!("d{i}"),
                    lat: 12.97,
                    lon: 77.59,
                })
                .collect(),
            message_type,
        }
    }

    #[test]
    fn untagged_messages_follow_shape_rule() {
        assert_eq!(classify(&response(0, None), false), InboundEvent::NoDrivers);
        assert_eq!(classify(&response(0, None), true), InboundEvent::Timeout);
        assert_eq!(classify(&response(1, None), false), InboundEvent::SearchResult);
        assert_eq!(classify(&response(1, None), true), InboundEvent::Acceptance);
        assert_eq!(classify(&response(3, None), false), InboundEvent::SearchResult);
        assert_eq!(classify(&response(3, None), true), InboundEvent::SearchResult);
    }

    #[test]
    fn explicit_tag_overrides_shape() {
        // A lone driver before any candidate set is still an acceptance when tagged.
        assert_eq!(
            classify(&response(1, Some(ResponseKind::Acceptance)), false),
            InboundEvent::Acceptance
        );
        // A single-driver search result is not mistaken for an acceptance.
        assert_eq!(
            classify(&response(1, Some(ResponseKind::SearchResult)), true),
            InboundEvent::SearchResult
        );
        assert_eq!(
            classify(&response(0, Some(ResponseKind::Timeout)), false),
            InboundEvent::Timeout
        );
        assert_eq!(
            classify(&response(0, Some(ResponseKind::SearchResult)), false),
            InboundEvent::NoDrivers
        );
        assert_eq!(
            classify(&response(2, Some(ResponseKind::Acceptance)), true),
            InboundEvent::Malformed
        );
    }

    #[test]
    fn candidate_distance_is_measured_from_pickup() {
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let driver = DriverLocation {
            driver_id: "d1".to_string(),
            lat: 12.9279,
            lon: 77.6271,
        };
        let candidate = candidate_for(pickup, &driver);
        assert!((candidate.distance_km - 6.0013).abs() < 0.001);
    }
}
