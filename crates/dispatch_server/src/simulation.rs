//! Synthetic load: seeded drivers answering offers through a logit acceptance
//! model, and riders submitting requests around a city centre.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dispatch_contract::{CreateRideRequest, DriverAction, DriverOffer, DriverResponse, RideStatus};
use dispatch_core::clock::Clock;
use dispatch_core::notify::Delivery;
use dispatch_core::telemetry::TelemetrySnapshot;
use dispatch_core::{haversine_km, GeoPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Driver decision behaviour: stochastic logit model for ACCEPT/REJECT.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverBehaviour {
    /// Base acceptance score before factors are applied.
    pub base_acceptance_score: f64,
    /// Weight for fare attractiveness (higher fare increases acceptance).
    pub fare_weight: f64,
    /// Per km from the driver to the pickup (negative: far pickups are declined).
    pub pickup_distance_penalty: f64,
    /// Per km of trip length (longer trips are more attractive).
    pub trip_distance_bonus: f64,
    /// Shortest time a driver takes to answer an offer.
    pub min_response: Duration,
    /// Longest time a driver takes to answer an offer.
    pub max_response: Duration,
}

impl Default for DriverBehaviour {
    fn default() -> Self {
        Self {
            base_acceptance_score: -1.5,
            fare_weight: 0.01,
            pickup_distance_penalty: -0.6,
            trip_distance_bonus: 0.1,
            min_response: Duration::from_millis(500),
            max_response: Duration::from_secs(8),
        }
    }
}

impl DriverBehaviour {
    /// Probability that a driver standing at `driver_at` accepts `offer`.
    pub fn acceptance_probability(&self, offer: &DriverOffer, driver_at: GeoPoint) -> f64 {
        let pickup = GeoPoint::new(offer.pickup_lat, offer.pickup_lon);
        let dropoff = GeoPoint::new(offer.dropoff_lat, offer.dropoff_lon);
        let score = self.base_acceptance_score
            + offer.price * self.fare_weight
            + haversine_km(driver_at, pickup) * self.pickup_distance_penalty
            + haversine_km(pickup, dropoff) * self.trip_distance_bonus;
        1.0 / (1.0 + (-score).exp())
    }

    /// Sample an action and how long the driver takes to send it.
    pub fn decide<R: Rng>(
        &self,
        rng: &mut R,
        offer: &DriverOffer,
        driver_at: GeoPoint,
    ) -> (DriverAction, Duration) {
        let accept = rng.gen::<f64>() < self.acceptance_probability(offer, driver_at);
        let action = if accept {
            DriverAction::Accept
        } else {
            DriverAction::Reject
        };
        let delay = if self.max_response > self.min_response {
            rng.gen_range(self.min_response..=self.max_response)
        } else {
            self.min_response
        };
        (action, delay)
    }
}

#[derive(Debug, Clone)]
pub struct SimScenario {
    pub seed: u64,
    pub num_drivers: usize,
    pub num_rides: usize,
    pub center: GeoPoint,
    /// Drivers and pickups are scattered up to this far from the centre.
    pub spread_km: f64,
    /// Gap between consecutive ride submissions.
    pub ride_interval: Duration,
    pub behaviour: DriverBehaviour,
}

impl Default for SimScenario {
    fn default() -> Self {
        Self {
            seed: 42,
            num_drivers: 200,
            num_rides: 100,
            center: GeoPoint::new(12.9716, 77.5946),
            spread_km: 8.0,
            ride_interval: Duration::from_millis(200),
            behaviour: DriverBehaviour::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimReport {
    pub rides_submitted: usize,
    pub rides_rejected: usize,
    /// Final rider-visible status per ride, keyed by status name.
    pub outcomes: BTreeMap<String, usize>,
    pub accepts_sent: u64,
    pub rejects_sent: u64,
    pub telemetry: TelemetrySnapshot,
}

impl SimReport {
    pub fn count(&self, status: RideStatus) -> usize {
        self.outcomes.get(&status_name(status)).copied().unwrap_or(0)
    }
}

fn status_name(status: RideStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{status:?}"))
}

/// Uniform point within `radius_km` of `center`.
pub fn scatter<R: Rng>(rng: &mut R, center: GeoPoint, radius_km: f64) -> GeoPoint {
    let distance = radius_km * rng.gen::<f64>().sqrt();
    let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
    let dlat = distance * bearing.cos() / 111.195;
    let dlon = distance * bearing.sin() / (111.195 * center.lat.to_radians().cos().max(0.01));
    GeoPoint::new(
        (center.lat + dlat).clamp(-90.0, 90.0),
        (center.lon + dlon).clamp(-180.0, 180.0),
    )
}

#[derive(Default)]
struct ResponseCounters {
    accepts: AtomicU64,
    rejects: AtomicU64,
}

/// Run `scenario` against a wired process whose bus consumers are already
/// running. Returns once every submitted ride has had time to resolve.
pub async fn run(state: &AppState, scenario: &SimScenario) -> SimReport {
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let counters = Arc::new(ResponseCounters::default());
    let mut drivers = JoinSet::new();

    for i in 0..scenario.num_drivers {
        let driver_id = format!("sim-driver-{i}");
        let position = scatter(&mut rng, scenario.center, scenario.spread_km);
        if let Err(err) = state.index.upsert(&driver_id, position, state.clock.now()) {
            warn!(driver_id = %driver_id, error = %err, "could not place simulated driver");
            continue;
        }
        state.directory.register(driver_id.clone(), format!("Driver {i}"));

        let offers = state.hub.subscribe_driver(&driver_id);
        let driver_rng = StdRng::seed_from_u64(scenario.seed.wrapping_add(i as u64 + 1));
        drivers.spawn(drive(
            state.clone(),
            driver_id,
            position,
            offers,
            driver_rng,
            scenario.behaviour,
            Arc::clone(&counters),
        ));
    }
    info!(drivers = drivers.len(), "simulated drivers online");

    let mut submitted = Vec::with_capacity(scenario.num_rides);
    let mut rejected = 0;
    for i in 0..scenario.num_rides {
        let pickup = scatter(&mut rng, scenario.center, scenario.spread_km);
        let dropoff = scatter(&mut rng, pickup, scenario.spread_km);
        let request = CreateRideRequest {
            user_id: format!("sim-rider-{i}"),
            pickup_lat: pickup.lat,
            pickup_lon: pickup.lon,
            dropoff_lat: dropoff.lat,
            dropoff_lon: dropoff.lon,
            pickup_time: None,
        };
        match state.gateway.initiate(request).await {
            Ok(response) => submitted.push(response.request_id),
            Err(err) => {
                rejected += 1;
                warn!(error = %err, "simulated ride request refused");
            }
        }
        tokio::time::sleep(scenario.ride_interval).await;
    }

    // Long enough for the last offer window to close and its outcome to land.
    let settle = Duration::from_secs(state.config.offer_timeout_secs)
        + scenario.behaviour.max_response
        + Duration::from_secs(1);
    tokio::time::sleep(settle).await;
    drivers.abort_all();

    let mut outcomes = BTreeMap::new();
    for request_id in &submitted {
        let status = state.gateway.status(request_id).status;
        *outcomes.entry(status_name(status)).or_insert(0) += 1;
    }

    SimReport {
        rides_submitted: submitted.len(),
        rides_rejected: rejected,
        outcomes,
        accepts_sent: counters.accepts.load(Ordering::Relaxed),
        rejects_sent: counters.rejects.load(Ordering::Relaxed),
        telemetry: state.telemetry.snapshot(),
    }
}

async fn drive(
    state: AppState,
    driver_id: String,
    position: GeoPoint,
    mut offers: tokio::sync::broadcast::Receiver<Delivery>,
    mut rng: StdRng,
    behaviour: DriverBehaviour,
    counters: Arc<ResponseCounters>,
) {
    loop {
        let offer = match offers.recv().await {
            Ok(Delivery::Offer(offer)) => offer,
            Ok(Delivery::Rider(_)) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(driver_id = %driver_id, skipped, "driver fell behind on offers");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let (action, delay) = behaviour.decide(&mut rng, &offer, position);
        let state = state.clone();
        let counters = Arc::clone(&counters);
        let driver_id = driver_id.clone();
        // answer on a separate task so one slow decision does not hold the next offer
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match action {
                DriverAction::Accept => counters.accepts.fetch_add(1, Ordering::Relaxed),
                DriverAction::Reject => counters.rejects.fetch_add(1, Ordering::Relaxed),
            };
            let response = DriverResponse {
                request_id: offer.request_id.clone(),
                driver_id: driver_id.clone(),
                action,
            };
            match state.broadcaster.on_driver_response(response).await {
                Ok(outcome) => debug!(request_id = %offer.request_id, driver_id = %driver_id, ?outcome, "driver answered"),
                Err(err) => warn!(request_id = %offer.request_id, driver_id = %driver_id, error = %err, "driver answer refused"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(price: f64, pickup: GeoPoint, dropoff: GeoPoint) -> DriverOffer {
        DriverOffer {
            request_id: "req-1".to_string(),
            user_id: "rider-1".to_string(),
            pickup_lat: pickup.lat,
            pickup_lon: pickup.lon,
            dropoff_lat: dropoff.lat,
            dropoff_lon: dropoff.lon,
            price,
            expires_at: 0,
            message: String::new(),
        }
    }

    #[test]
    fn far_pickups_are_less_attractive() {
        let behaviour = DriverBehaviour::default();
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let dropoff = GeoPoint::new(12.9279, 77.6271);
        let ride = offer(110.0, pickup, dropoff);

        let near = behaviour.acceptance_probability(&ride, pickup);
        let far = behaviour.acceptance_probability(&ride, GeoPoint::new(13.0166, 77.5946));
        assert!(near > far);
        assert!((0.0..=1.0).contains(&near) && (0.0..=1.0).contains(&far));
    }

    #[test]
    fn decisions_are_reproducible_for_a_seed() {
        let behaviour = DriverBehaviour::default();
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let ride = offer(110.0, pickup, GeoPoint::new(12.9279, 77.6271));

        let sample = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| behaviour.decide(&mut rng, &ride, pickup))
                .collect::<Vec<_>>()
        };
        assert_eq!(sample(7), sample(7));
        for (_, delay) in sample(7) {
            assert!(delay >= behaviour.min_response && delay <= behaviour.max_response);
        }
    }

    #[test]
    fn scatter_stays_within_radius() {
        let mut rng = StdRng::seed_from_u64(3);
        let center = GeoPoint::new(12.9716, 77.5946);
        for _ in 0..500 {
            let point = scatter(&mut rng, center, 5.0);
            assert!(haversine_km(center, point) <= 5.05);
        }
    }
}
