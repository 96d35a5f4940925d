//! Rider-facing push notifications.
//!
//! Every status push is one of a closed set of variants, tagged by `type` on
//! the wire, so consumers can match on intent instead of parsing free text.

use serde::{Deserialize, Serialize};

/// Address of the status channel a rider listens on for one request.
pub fn rider_channel(request_id: &str) -> String {
    format!("user/{request_id}/ride-status")
}

/// Address of a driver's private offer channel.
pub fn driver_channel(driver_id: &str) -> String {
    format!("driver/{driver_id}/ride-requests")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiderNotification {
    #[serde(rename_all = "camelCase")]
    DriversFound {
        request_id: String,
        driver_count: usize,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    NoDrivers { request_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    Timeout { request_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    DriverAccepted {
        request_id: String,
        driver_id: String,
        status: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    BookingConfirmed {
        request_id: String,
        booking_id: u64,
        driver_id: String,
        status: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    BookingFailed {
        request_id: String,
        driver_id: String,
        content: String,
    },
}

impl RiderNotification {
    pub fn drivers_found(request_id: &str, driver_count: usize) -> Self {
        Self::DriversFound {
            request_id: request_id.to_string(),
            driver_count,
            content: format!("Found {driver_count} nearby drivers. Waiting for acceptance..."),
        }
    }

    pub fn no_drivers(request_id: &str) -> Self {
        Self::NoDrivers {
            request_id: request_id.to_string(),
            content: "No nearby drivers found. Please try again later.".to_string(),
        }
    }

    pub fn timeout(request_id: &str) -> Self {
        Self::Timeout {
            request_id: request_id.to_string(),
            content: "Request timed out - no driver accepted. Please try again.".to_string(),
        }
    }

    pub fn driver_accepted(request_id: &str, driver_id: &str) -> Self {
        Self::DriverAccepted {
            request_id: request_id.to_string(),
            driver_id: driver_id.to_string(),
            status: "CONFIRMED".to_string(),
            content: format!("Driver {driver_id} accepted your ride request"),
        }
    }

    pub fn booking_confirmed(request_id: &str, booking_id: u64, driver_id: &str) -> Self {
        Self::BookingConfirmed {
            request_id: request_id.to_string(),
            booking_id,
            driver_id: driver_id.to_string(),
            status: "CONFIRMED".to_string(),
            content: format!("Ride confirmed! Booking ID: {booking_id}, Driver: {driver_id}"),
        }
    }

    pub fn booking_failed(request_id: &str, driver_id: &str) -> Self {
        Self::BookingFailed {
            request_id: request_id.to_string(),
            driver_id: driver_id.to_string(),
            content: "A driver accepted but your booking could not be created. Please try again."
                .to_string(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::DriversFound { request_id, .. }
            | Self::NoDrivers { request_id, .. }
            | Self::Timeout { request_id, .. }
            | Self::DriverAccepted { request_id, .. }
            | Self::BookingConfirmed { request_id, .. }
            | Self::BookingFailed { request_id, .. } => request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booking_confirmed_carries_type_tag_and_camel_case_fields() {
        let value =
            serde_json::to_value(RiderNotification::booking_confirmed("req-1", 7, "d2")).expect("json");
        assert_eq!(value["type"], "BOOKING_CONFIRMED");
        assert_eq!(value["requestId"], "req-1");
        assert_eq!(value["bookingId"], 7);
        assert_eq!(value["driverId"], "d2");
        assert_eq!(value["status"], "CONFIRMED");
    }

    #[test]
    fn unknown_notification_type_is_rejected() {
        let result = serde_json::from_value::<RiderNotification>(json!({
            "type": "SOMETHING_ELSE",
            "requestId": "req-1",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn channel_addresses_follow_topic_layout() {
        assert_eq!(rider_channel("abc"), "user/abc/ride-status");
        assert_eq!(driver_channel("d1"), "driver/d1/ride-requests");
    }
}
