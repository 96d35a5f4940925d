//! Ride-matching protocol engine.
//!
//! A ride request travels gateway → bus → geo matcher → broadcaster → drivers,
//! and the winning acceptance travels back over the bus to the gateway, which
//! hands it to the booking materializer.
//!
//! - [`gateway::RiderGateway`] owns the rider-facing lifecycle of a request.
//! - [`matcher::GeoMatcher`] turns a pickup point into candidate drivers.
//! - [`broadcaster::DispatchBroadcaster`] fans offers out and resolves the
//!   acceptance race.
//! - [`bus`], [`notify`], [`directory`] and [`booking`] are the seams to the
//!   outside world, each with an in-memory implementation.

pub mod booking;
pub mod broadcaster;
pub mod bus;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod matcher;
pub mod notify;
pub mod pipeline;
pub mod pricing;
pub mod spatial;
pub mod telemetry;

pub use broadcaster::{BroadcasterDeps, DispatchBroadcaster, ResponseOutcome};
pub use config::DispatchConfig;
pub use error::{BookingError, BusError, DispatchError};
pub use gateway::{GatewayDeps, RiderGateway, SweepStats};
pub use matcher::{CandidateResponse, DriverCandidate, GeoMatcher};
pub use spatial::{haversine_km, DriverGeoIndex, GeoPoint};
