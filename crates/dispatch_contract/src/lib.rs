//! Wire contracts for the ride-matching protocol.
//!
//! This crate owns the message schemas exchanged between the rider gateway,
//! the geo matcher and the dispatch broadcaster, plus the boundary validation
//! applied to them. No runtime, bus or HTTP dependencies.

pub mod contract;
pub mod notifications;
pub mod status;

pub use contract::{
    validate_create_ride_request, validate_dispatch_intake, validate_driver_response,
    CreateRideRequest, DispatchIntake, DriverAction, DriverLocation, DriverOffer, DriverResponse,
    DriverSearchRequest, DriverSearchResponse, ResponseKind, ValidationError,
    DEFAULT_OFFER_TIMEOUT_SECS, MAX_OFFER_TIMEOUT_SECS,
};
pub use notifications::{driver_channel, rider_channel, RiderNotification};
pub use status::{
    DispatchStatus, DispatchStatusResponse, DriverInfo, RideStatus, RideStatusResponse,
};
