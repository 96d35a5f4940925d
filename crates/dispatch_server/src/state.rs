//! Process-wide wiring of the dispatch components.

use std::sync::Arc;

use dispatch_contract::ValidationError;
use dispatch_core::booking::InMemoryBookings;
use dispatch_core::bus::{InMemoryBus, DEFAULT_TOPIC_CAPACITY};
use dispatch_core::clock::{Clock, SystemClock};
use dispatch_core::directory::InMemoryDirectory;
use dispatch_core::notify::ChannelHub;
use dispatch_core::telemetry::DispatchTelemetry;
use dispatch_core::{
    BroadcasterDeps, DispatchBroadcaster, DispatchConfig, DriverGeoIndex, GatewayDeps,
    GeoMatcher, RiderGateway,
};

/// Shared handle to every component of one dispatch process. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DispatchConfig>,
    pub index: Arc<DriverGeoIndex>,
    pub matcher: Arc<GeoMatcher>,
    pub bus: Arc<InMemoryBus>,
    pub hub: Arc<ChannelHub>,
    pub directory: Arc<InMemoryDirectory>,
    pub bookings: Arc<InMemoryBookings>,
    pub clock: Arc<dyn Clock>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub gateway: Arc<RiderGateway>,
    pub broadcaster: Arc<DispatchBroadcaster>,
}

impl AppState {
    pub fn new(config: DispatchConfig) -> Result<Self, ValidationError> {
        Self::builder(config).build()
    }

    pub fn builder(config: DispatchConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct AppStateBuilder {
    config: DispatchConfig,
    topic_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl AppStateBuilder {
    pub fn topic_capacity(mut self, capacity: usize) -> Self {
        self.topic_capacity = capacity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<AppState, ValidationError> {
        let config = self.config;
        config.validate()?;

        let index = Arc::new(DriverGeoIndex::new(config.resolution()?));
        let matcher = Arc::new(GeoMatcher::new(
            Arc::clone(&index),
            config.search_radius_km,
            config.max_candidates,
        ));
        let bus = Arc::new(InMemoryBus::new(self.topic_capacity, config.send_timeout()));
        let hub = Arc::new(ChannelHub::default());
        let directory = Arc::new(InMemoryDirectory::new());
        let bookings = Arc::new(InMemoryBookings::default());
        let telemetry = Arc::new(DispatchTelemetry::default());
        let clock = self.clock;

        let gateway = Arc::new(RiderGateway::new(
            &config,
            GatewayDeps {
                bus: bus.clone(),
                notifier: hub.clone(),
                directory: directory.clone(),
                bookings: bookings.clone(),
                clock: clock.clone(),
                telemetry: telemetry.clone(),
            },
        ));
        let broadcaster = Arc::new(DispatchBroadcaster::new(
            &config,
            BroadcasterDeps {
                bus: bus.clone(),
                notifier: hub.clone(),
                clock: clock.clone(),
                telemetry: telemetry.clone(),
            },
        ));

        Ok(AppState {
            config: Arc::new(config),
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
        })
    }
}
