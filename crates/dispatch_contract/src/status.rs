use serde::{Deserialize, Serialize};

/// Lifecycle of a ride request as seen by the rider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Searching,
    DriverFound,
    Accepted,
    NoDrivers,
    Timeout,
    NotFound,
    /// A driver accepted but the booking could not be persisted.
    BookingFailed,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Searching | Self::DriverFound)
    }

    pub fn default_message(self) -> &'static str {
        match self {
            Self::Searching => "Searching for nearby drivers...",
            Self::DriverFound => "Drivers found, waiting for acceptance...",
            Self::Accepted => "Ride confirmed",
            Self::NoDrivers => "No nearby drivers found. Please try again later.",
            Self::Timeout => "Request timed out - no driver accepted. Please try again.",
            Self::NotFound => "Ride request not found or expired",
            Self::BookingFailed => "A driver accepted but the booking could not be created",
        }
    }
}

/// Candidate driver as presented to the rider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub driver_id: String,
    pub driver_name: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideStatusResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: RideStatus,
    pub message: String,
    #[serde(default)]
    pub drivers: Vec<DriverInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<f64>,
}

impl RideStatusResponse {
    pub fn new(request_id: impl Into<String>, status: RideStatus) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: None,
            status,
            message: status.default_message().to_string(),
            drivers: Vec::new(),
            driver_id: None,
            booking_id: None,
            estimated_price: None,
        }
    }

    pub fn not_found(request_id: impl Into<String>) -> Self {
        Self::new(request_id, RideStatus::NotFound)
    }
}

/// Broadcaster-local view of a dispatched request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchStatus {
    Accepted,
    Pending,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatusResponse {
    pub request_id: String,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ride_status_serializes_in_screaming_case() {
        let value = serde_json::to_value(RideStatus::DriverFound).expect("serialize");
        assert_eq!(value, "DRIVER_FOUND");
        let value = serde_json::to_value(RideStatus::NotFound).expect("serialize");
        assert_eq!(value, "NOT_FOUND");
    }

    #[test]
    fn only_searching_states_are_non_terminal() {
        assert!(!RideStatus::Searching.is_terminal());
        assert!(!RideStatus::DriverFound.is_terminal());
        assert!(RideStatus::Accepted.is_terminal());
        assert!(RideStatus::Timeout.is_terminal());
        assert!(RideStatus::BookingFailed.is_terminal());
    }

    #[test]
    fn not_found_response_carries_default_message() {
        let response = RideStatusResponse::not_found("req-9");
        assert_eq!(response.status, RideStatus::NotFound);
        assert_eq!(response.message, "Ride request not found or expired");
        assert!(response.drivers.is_empty());
    }
}
