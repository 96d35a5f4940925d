//! Dispatch broadcaster: offer fan-out and acceptance race resolution.
//!
//! For each request the broadcaster pushes one offer per candidate driver,
//! arms a cancellable timer and waits. The first ACCEPT whose write reaches
//! the request's state entry wins; the timer only fires into an entry whose
//! accept slot is still empty.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dispatch_contract::{
    validate_dispatch_intake, validate_driver_response, DispatchIntake, DispatchStatus,
    DispatchStatusResponse, DriverAction, DriverLocation, DriverOffer, DriverResponse,
    DriverSearchResponse, RiderNotification, MAX_OFFER_TIMEOUT_SECS,
};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{publish_within, MessageBus, Topic};
use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::notify::Notifier;
use crate::spatial::GeoPoint;
use crate::telemetry::DispatchTelemetry;

pub const OFFER_MESSAGE: &str = "New ride request available";

/// How a driver response was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseOutcome {
    /// This driver won the request.
    Accepted,
    /// REJECT recorded; the request stays open for the other candidates.
    Rejected,
    /// Another driver already won, or the offer window closed.
    AlreadyResolved,
    /// The driver was never offered this request.
    NotCandidate,
    UnknownRequest,
}

struct DispatchState {
    payload: DispatchIntake,
    /// Drivers still eligible to respond.
    pending_driver_ids: HashSet<String>,
    locations: HashMap<String, GeoPoint>,
    /// Write-once; set under the entry's write lock.
    accepted_driver_id: Option<String>,
    timer: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolution {
    status: DispatchStatus,
    driver_id: Option<String>,
}

#[derive(Clone)]
pub struct BroadcasterDeps {
    pub bus: Arc<dyn MessageBus>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub telemetry: Arc<DispatchTelemetry>,
}

/// Owns every in-flight offer of this process.
///
/// At-most-one acceptance rests on the compare-and-set against this
/// in-process map, so exactly one broadcaster instance may own a given
/// request id. Running several instances behind a load balancer needs the
/// state moved to a shared store with atomic conditional writes.
pub struct DispatchBroadcaster {
    states: DashMap<String, DispatchState>,
    resolved: Mutex<LruCache<String, Resolution>>,
    deps: BroadcasterDeps,
    default_timeout_secs: u64,
    send_timeout: Duration,
}

impl DispatchBroadcaster {
    pub fn new(config: &DispatchConfig, deps: BroadcasterDeps) -> Self {
        let capacity = NonZeroUsize::new(config.outcome_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            states: DashMap::new(),
            resolved: Mutex::new(LruCache::new(capacity)),
            deps,
            default_timeout_secs: config.offer_timeout_secs,
            send_timeout: config.send_timeout(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.states.len()
    }

    pub fn accepted_driver(&self, request_id: &str) -> Option<String> {
        if let Some(state) = self.states.get(request_id) {
            return state.accepted_driver_id.clone();
        }
        self.resolved
            .lock()
            .peek(request_id)
            .and_then(|resolution| resolution.driver_id.clone())
    }

    /// Validate a hand-off from the geo matcher and start the offer round.
    ///
    /// An empty candidate list is answered upstream with NO_DRIVERS so the
    /// rider is not left searching, and reported to the caller as an error.
    pub async fn intake(self: &Arc<Self>, intake: DispatchIntake) -> Result<usize, DispatchError> {
        validate_dispatch_intake(&intake)?;

        if intake.driver_ids.is_empty() {
            info!(request_id = %intake.request_id, "no candidate drivers, answering NO_DRIVERS");
            let response = DriverSearchResponse::no_drivers(&intake.request_id, &intake.user_id);
            self.publish_upstream(&response).await;
            return Err(DispatchError::NoCandidates(intake.request_id));
        }

        let timeout_secs = intake.timeout_seconds.unwrap_or(self.default_timeout_secs);
        Ok(self.broadcast(intake, timeout_secs).await)
    }

    /// Offer `payload` to every driver in `payload.driver_ids` and arm the
    /// offer timer. Returns how many drivers were notified; a request that is
    /// already in flight or already resolved is left alone and yields 0.
    ///
    /// The window never runs past `payload.expires_at`. A payload whose
    /// deadline has already passed is answered with TIMEOUT straight away.
    pub async fn broadcast(self: &Arc<Self>, payload: DispatchIntake, timeout_secs: u64) -> usize {
        let timeout_secs = timeout_secs.clamp(1, MAX_OFFER_TIMEOUT_SECS);
        let now = self.deps.clock.now();
        let window = offer_window(timeout_secs, payload.expires_at, now);
        let request_id = payload.request_id.clone();
        if self.resolved.lock().contains(&request_id) {
            debug!(request_id = %request_id, "request already resolved, ignoring duplicate intake");
            return 0;
        }

        let mut seen = HashSet::new();
        let driver_ids: Vec<String> = payload
            .driver_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let locations: HashMap<String, GeoPoint> = payload
            .drivers
            .iter()
            .map(|d| (d.driver_id.clone(), GeoPoint::new(d.lat, d.lon)))
            .collect();

        let timer = CancellationToken::new();
        match self.states.entry(request_id.clone()) {
            Entry::Occupied(_) => {
                debug!(request_id = %request_id, "request already in flight, ignoring duplicate intake");
                return 0;
            }
            Entry::Vacant(_) if window.is_none() => {
                self.resolved.lock().put(
                    request_id.clone(),
                    Resolution {
                        status: DispatchStatus::Timeout,
                        driver_id: None,
                    },
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(DispatchState {
                    payload: payload.clone(),
                    pending_driver_ids: driver_ids.iter().cloned().collect(),
                    locations: locations.clone(),
                    accepted_driver_id: None,
                    timer: timer.clone(),
                });
            }
        }

        let Some(window) = window else {
            self.deps.telemetry.timed_out();
            warn!(
                request_id = %request_id,
                expires_at = ?payload.expires_at,
                "rider deadline already passed, answering TIMEOUT without offers"
            );
            let response = DriverSearchResponse::timeout(&request_id, &payload.user_id);
            self.publish_upstream(&response).await;
            return 0;
        };
        self.arm_timer(request_id.clone(), timer, window);

        let candidates: Vec<DriverLocation> = driver_ids
            .iter()
            .map(|id| location_of(id, &locations))
            .collect();
        let announcement =
            DriverSearchResponse::search_result(&request_id, &payload.user_id, candidates);
        self.publish_upstream(&announcement).await;

        let expires_at = now.timestamp_millis() + window.as_millis() as i64;
        let offer = DriverOffer {
            request_id: request_id.clone(),
            user_id: payload.user_id.clone(),
            pickup_lat: payload.pickup_lat,
            pickup_lon: payload.pickup_lon,
            dropoff_lat: payload.dropoff_lat,
            dropoff_lon: payload.dropoff_lon,
            price: payload.price,
            expires_at,
            message: OFFER_MESSAGE.to_string(),
        };
        for driver_id in &driver_ids {
            self.deps.notifier.offer_driver(driver_id, &offer);
        }
        self.deps.telemetry.offers_sent(driver_ids.len());

        info!(
            request_id = %request_id,
            drivers = driver_ids.len(),
            timeout_secs,
            window_ms = window.as_millis() as u64,
            "ride offer broadcast"
        );
        driver_ids.len()
    }

    fn arm_timer(self: &Arc<Self>, request_id: String, token: CancellationToken, timeout: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(request_id = %request_id, "offer timer cancelled");
                }
                _ = tokio::time::sleep(timeout) => {
                    this.expire(&request_id).await;
                }
            }
        });
    }

    /// Timer callback. Ends the request with TIMEOUT only if nobody accepted;
    /// returns whether it did.
    pub async fn expire(&self, request_id: &str) -> bool {
        let removed = self.states.remove_if(request_id, |_, state| {
            if state.accepted_driver_id.is_some() {
                return false;
            }
            self.resolved.lock().put(
                request_id.to_string(),
                Resolution {
                    status: DispatchStatus::Timeout,
                    driver_id: None,
                },
            );
            true
        });
        let Some((_, state)) = removed else {
            debug!(request_id, "offer timer fired after resolution, nothing to do");
            return false;
        };

        self.deps.telemetry.timed_out();
        warn!(
            request_id,
            candidates = state.pending_driver_ids.len(),
            "no driver accepted before the offer expired"
        );
        let response = DriverSearchResponse::timeout(request_id, &state.payload.user_id);
        self.publish_upstream(&response).await;
        true
    }

    /// Apply one driver's ACCEPT or REJECT.
    pub async fn on_driver_response(
        &self,
        response: DriverResponse,
    ) -> Result<ResponseOutcome, DispatchError> {
        validate_driver_response(&response)?;
        let request_id = response.request_id.as_str();
        let driver_id = response.driver_id.as_str();

        match response.action {
            DriverAction::Reject => Ok(self.reject(request_id, driver_id)),
            DriverAction::Accept => Ok(self.accept(request_id, driver_id).await),
        }
    }

    fn reject(&self, request_id: &str, driver_id: &str) -> ResponseOutcome {
        match self.states.get(request_id) {
            Some(state) if state.pending_driver_ids.contains(driver_id) => {
                debug!(request_id, driver_id, "driver rejected offer");
                ResponseOutcome::Rejected
            }
            Some(_) => {
                warn!(request_id, driver_id, "reject from a driver that was not offered the ride");
                ResponseOutcome::NotCandidate
            }
            None => self.late_response(request_id, driver_id, DriverAction::Reject),
        }
    }

    async fn accept(&self, request_id: &str, driver_id: &str) -> ResponseOutcome {
        let (payload, location) = {
            let Some(mut state) = self.states.get_mut(request_id) else {
                return self.late_response(request_id, driver_id, DriverAction::Accept);
            };
            if !state.pending_driver_ids.contains(driver_id) {
                warn!(request_id, driver_id, "accept from a driver that was not offered the ride");
                return ResponseOutcome::NotCandidate;
            }
            if let Some(winner) = &state.accepted_driver_id {
                debug!(request_id, driver_id, winner = %winner, "accept lost the race");
                self.deps.telemetry.lost_accept_race();
                return ResponseOutcome::AlreadyResolved;
            }

            state.accepted_driver_id = Some(driver_id.to_string());
            state.timer.cancel();
            self.resolved.lock().put(
                request_id.to_string(),
                Resolution {
                    status: DispatchStatus::Accepted,
                    driver_id: Some(driver_id.to_string()),
                },
            );
            (
                state.payload.clone(),
                location_of(driver_id, &state.locations),
            )
        };
        self.states.remove(request_id);

        self.deps.telemetry.accepted();
        info!(request_id, driver_id, "driver accepted ride");

        let acceptance = DriverSearchResponse::acceptance(request_id, &payload.user_id, location);
        self.publish_upstream(&acceptance).await;
        self.deps
            .notifier
            .notify_rider(request_id, RiderNotification::driver_accepted(request_id, driver_id));
        ResponseOutcome::Accepted
    }

    fn late_response(&self, request_id: &str, driver_id: &str, action: DriverAction) -> ResponseOutcome {
        let resolved = self.resolved.lock().contains(request_id);
        if !resolved {
            warn!(request_id, driver_id, %action, "response for unknown request, dropping");
            return ResponseOutcome::UnknownRequest;
        }
        if action == DriverAction::Accept {
            self.deps.telemetry.lost_accept_race();
        }
        debug!(request_id, driver_id, %action, "response after resolution, dropping");
        ResponseOutcome::AlreadyResolved
    }

    /// Local view of a request. Anything not in flight and not remembered is
    /// reported as TIMEOUT.
    pub fn status(&self, request_id: &str) -> DispatchStatusResponse {
        let live = self.states.get(request_id).map(|state| state.accepted_driver_id.clone());
        let (status, driver_id) = match live {
            Some(Some(driver_id)) => (DispatchStatus::Accepted, Some(driver_id)),
            Some(None) => (DispatchStatus::Pending, None),
            None => match self.resolved.lock().get(request_id).cloned() {
                Some(resolution) => (resolution.status, resolution.driver_id),
                None => (DispatchStatus::Timeout, None),
            },
        };

        let message = match status {
            DispatchStatus::Accepted => "Driver accepted",
            DispatchStatus::Pending => "Waiting for driver response",
            DispatchStatus::Timeout => "No driver accepted",
        };
        DispatchStatusResponse {
            request_id: request_id.to_string(),
            status,
            driver_id,
            message: message.to_string(),
        }
    }

    /// Cancel every armed timer. In-flight requests stay where they are.
    pub fn shutdown(&self) {
        for state in self.states.iter() {
            state.timer.cancel();
        }
        info!(in_flight = self.states.len(), "offer timers cancelled");
    }

    async fn publish_upstream(&self, response: &DriverSearchResponse) {
        let published = publish_within(
            self.deps.bus.as_ref(),
            Topic::DriverSearchResponse,
            &response.request_id,
            response,
            self.send_timeout,
        )
        .await;
        if let Err(err) = published {
            error!(
                request_id = %response.request_id,
                kind = ?response.message_type,
                error = %err,
                "failed to publish search response"
            );
        }
    }
}

/// Requested offer window cut short by the rider deadline, if any. `None`
/// once the deadline is at or before `now`.
fn offer_window(timeout_secs: u64, deadline_ms: Option<i64>, now: DateTime<Utc>) -> Option<Duration> {
    let requested = Duration::from_secs(timeout_secs);
    let Some(deadline_ms) = deadline_ms else {
        return Some(requested);
    };
    let remaining_ms = deadline_ms.saturating_sub(now.timestamp_millis());
    if remaining_ms <= 0 {
        return None;
    }
    Some(requested.min(Duration::from_millis(remaining_ms as u64)))
}

/// Last known position of a candidate; (0, 0) when the intake carried none.
fn location_of(driver_id: &str, locations: &HashMap<String, GeoPoint>) -> DriverLocation {
    let point = locations
        .get(driver_id)
        .copied()
        .unwrap_or(GeoPoint::new(0.0, 0.0));
    DriverLocation {
        driver_id: driver_id.to_string(),
        lat: point.lat,
        lon: point.lon,
    }
}
