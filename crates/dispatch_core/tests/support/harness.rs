use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dispatch_contract::{CreateRideRequest, RideStatus};
use dispatch_core::booking::{
    BookingMaterializer, BookingReceipt, BookingRequest, InMemoryBookings,
};
use dispatch_core::bus::Topic;
use dispatch_core::clock::{Clock, ManualClock};
use dispatch_core::directory::InMemoryDirectory;
use dispatch_core::notify::{ChannelHub, Delivery};
use dispatch_core::pipeline::{handle_search_request, handle_search_response};
use dispatch_core::telemetry::DispatchTelemetry;
use dispatch_core::{
    BookingError, BroadcasterDeps, DispatchBroadcaster, DispatchConfig, DriverGeoIndex,
    GatewayDeps, GeoMatcher, GeoPoint, RiderGateway,
};
use tokio::sync::broadcast;

use super::bus::RecordingBus;

pub const PICKUP: GeoPoint = GeoPoint {
    lat: 12.9716,
    lon: 77.5946,
};

pub const DROPOFF: GeoPoint = GeoPoint {
    lat: 12.9279,
    lon: 77.6271,
};

/// A point `km` north of `origin`.
pub fn north_of(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + km / 111.195, origin.lon)
}

pub fn ride_request(user_id: &str) -> CreateRideRequest {
    CreateRideRequest {
        user_id: user_id.to_string(),
        pickup_lat: PICKUP.lat,
        pickup_lon: PICKUP.lon,
        dropoff_lat: DROPOFF.lat,
        dropoff_lon: DROPOFF.lon,
        pickup_time: None,
    }
}

/// Materializer that always refuses.
pub struct FailingBookings;

#[async_trait]
impl BookingMaterializer for FailingBookings {
    async fn materialize(&self, _request: BookingRequest) -> Result<BookingReceipt, BookingError> {
        Err(BookingError::Unavailable("booking store offline".to_string()))
    }
}

/// Every component of one dispatch process, wired to a hand-pumped bus.
pub struct Harness {
    pub config: DispatchConfig,
    pub index: Arc<DriverGeoIndex>,
    pub matcher: GeoMatcher,
    pub bus: Arc<RecordingBus>,
    pub hub: Arc<ChannelHub>,
    pub directory: Arc<InMemoryDirectory>,
    pub bookings: Arc<InMemoryBookings>,
    pub clock: Arc<ManualClock>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub gateway: RiderGateway,
    pub broadcaster: Arc<DispatchBroadcaster>,
}

#[derive(Default)]
pub struct HarnessBuilder {
    config: DispatchConfig,
    materializer: Option<Arc<dyn BookingMaterializer>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offer_timeout_secs(mut self, secs: u64) -> Self {
        self.config.offer_timeout_secs = secs;
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.config.max_candidates = Some(max);
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn BookingMaterializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn build(self) -> Harness {
        let config = self.config;
        let index = Arc::new(DriverGeoIndex::new(config.resolution().expect("resolution")));
        let matcher = GeoMatcher::new(
            Arc::clone(&index),
            config.search_radius_km,
            config.max_candidates,
        );
        let bus = Arc::new(RecordingBus::default());
        let hub = Arc::new(ChannelHub::default());
        let directory = Arc::new(InMemoryDirectory::new());
        let bookings = Arc::new(InMemoryBookings::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().expect("start time"),
        ));
        let telemetry = Arc::new(DispatchTelemetry::default());

        let materializer: Arc<dyn BookingMaterializer> = self
            .materializer
            .unwrap_or_else(|| bookings.clone() as Arc<dyn BookingMaterializer>);

        let gateway = RiderGateway::new(
            &config,
            GatewayDeps {
                bus: bus.clone(),
                notifier: hub.clone(),
                directory: directory.clone(),
                bookings: materializer,
                clock: clock.clone(),
                telemetry: telemetry.clone(),
            },
        );
        let broadcaster = Arc::new(DispatchBroadcaster::new(
            &config,
            BroadcasterDeps {
                bus: bus.clone(),
                notifier: hub.clone(),
                clock: clock.clone(),
                telemetry: telemetry.clone(),
            },
        ));

        Harness {
            config,
            index,
            matcher,
            bus,
            hub,
            directory,
            bookings,
            clock,
            telemetry,
            gateway,
            broadcaster,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Put a driver on the map, optionally with a directory record.
    pub fn place_driver(&self, driver_id: &str, name: Option<&str>, at: GeoPoint) {
        self.index
            .upsert(driver_id, at, self.clock.now())
            .expect("driver position");
        if let Some(name) = name {
            self.directory.register(driver_id, name);
        }
    }

    /// Deliver queued bus records until the queue is empty. Returns how many
    /// records were handled.
    pub async fn pump(&self) -> usize {
        let mut handled = 0;
        while let Some(record) = self.bus.pop() {
            match record.topic {
                Topic::DriverSearchRequest => {
                    let _ = handle_search_request(
                        &self.matcher,
                        &self.broadcaster,
                        self.config.offer_timeout_secs,
                        &record,
                    )
                    .await;
                }
                Topic::DriverSearchResponse => {
                    let _ = handle_search_response(&self.gateway, &record).await;
                }
            }
            handled += 1;
        }
        handled
    }

    pub async fn initiate(&self, user_id: &str) -> String {
        let response = self
            .gateway
            .initiate(ride_request(user_id))
            .await
            .expect("initiate");
        assert_eq!(response.status, RideStatus::Searching);
        response.request_id
    }
}

/// Drain everything already delivered to a channel subscriber.
pub fn drain(rx: &mut broadcast::Receiver<Delivery>) -> Vec<Delivery> {
    let mut out = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        out.push(delivery);
    }
    out
}
