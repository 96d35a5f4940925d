use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Offer window used when a dispatch intake does not carry `timeoutSeconds`.
pub const DEFAULT_OFFER_TIMEOUT_SECS: u64 = 60;

/// Longest offer window a dispatch intake may ask for.
pub const MAX_OFFER_TIMEOUT_SECS: u64 = 3_600;

/// Search request emitted by the rider gateway, keyed by `requestId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverSearchRequest {
    pub request_id: String,
    pub user_id: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub price: f64,
    /// Epoch millis after which the rider gateway stops waiting on this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    pub driver_id: String,
    pub lat: f64,
    pub lon: f64,
}

/// Explicit intent of a [`DriverSearchResponse`].
///
/// Producers in this workspace always set it. Messages without a tag fall back
/// to shape-based classification in the rider gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    SearchResult,
    Acceptance,
    Timeout,
    NoDrivers,
}

/// Response flowing back to the rider gateway. The same schema carries the
/// initial candidate list, an acceptance and the no-acceptance outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverSearchResponse {
    pub request_id: String,
    pub user_id: String,
    #[serde(default)]
    pub drivers: Vec<DriverLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<ResponseKind>,
}

impl DriverSearchResponse {
    pub fn search_result(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        drivers: Vec<DriverLocation>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            drivers,
            message_type: Some(ResponseKind::SearchResult),
        }
    }

    pub fn acceptance(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        driver: DriverLocation,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            drivers: vec![driver],
            message_type: Some(ResponseKind::Acceptance),
        }
    }

    pub fn timeout(request_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            drivers: Vec::new(),
            message_type: Some(ResponseKind::Timeout),
        }
    }

    pub fn no_drivers(request_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            drivers: Vec::new(),
            message_type: Some(ResponseKind::NoDrivers),
        }
    }
}

/// Rider-side ride request as received over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub user_id: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_time: Option<DateTime<Utc>>,
}

/// Synchronous hand-off from the geo matcher to the dispatch broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchIntake {
    pub request_id: String,
    pub user_id: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub price: f64,
    #[serde(default)]
    pub driver_ids: Vec<String>,
    #[serde(default)]
    pub drivers: Vec<DriverLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Rider-side deadline in epoch millis. Offers never outlive it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl DispatchIntake {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_seconds.unwrap_or(DEFAULT_OFFER_TIMEOUT_SECS)
    }
}

/// Offer pushed to each candidate driver's private channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverOffer {
    pub request_id: String,
    pub user_id: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub price: f64,
    /// Epoch milliseconds after which the offer is void.
    pub expires_at: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriverAction {
    Accept,
    Reject,
}

impl FromStr for DriverAction {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(Self::Accept),
            "REJECT" => Ok(Self::Reject),
            other => Err(ValidationError::new(format!(
                "action must be ACCEPT or REJECT, got '{other}'"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for DriverAction {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(de)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for DriverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("ACCEPT"),
            Self::Reject => f.write_str("REJECT"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverResponse {
    pub request_id: String,
    pub driver_id: String,
    pub action: DriverAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn require_id(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_coordinate(field: &str, lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::new(format!(
            "{field} latitude must be within [-90, 90], got {lat}"
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(ValidationError::new(format!(
            "{field} longitude must be within [-180, 180], got {lon}"
        )));
    }
    Ok(())
}

pub fn validate_create_ride_request(request: &CreateRideRequest) -> Result<(), ValidationError> {
    require_id("userId", &request.user_id)?;
    require_coordinate("pickup", request.pickup_lat, request.pickup_lon)?;
    require_coordinate("dropoff", request.dropoff_lat, request.dropoff_lon)?;
    Ok(())
}

pub fn validate_dispatch_intake(intake: &DispatchIntake) -> Result<(), ValidationError> {
    require_id("requestId", &intake.request_id)?;
    require_id("userId", &intake.user_id)?;
    require_coordinate("pickup", intake.pickup_lat, intake.pickup_lon)?;
    require_coordinate("dropoff", intake.dropoff_lat, intake.dropoff_lon)?;

    if !intake.price.is_finite() || intake.price < 0.0 {
        return Err(ValidationError::new(
            "price must be a non-negative finite number",
        ));
    }

    if let Some(timeout) = intake.timeout_seconds {
        if timeout == 0 || timeout > MAX_OFFER_TIMEOUT_SECS {
            return Err(ValidationError::new(format!(
                "timeoutSeconds must be between 1 and {MAX_OFFER_TIMEOUT_SECS}"
            )));
        }
    }

    if intake.driver_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ValidationError::new("driverIds cannot contain empty ids"));
    }

    for driver in &intake.drivers {
        require_id("driverId", &driver.driver_id)?;
        require_coordinate("driver", driver.lat, driver.lon)?;
    }

    Ok(())
}

pub fn validate_driver_response(response: &DriverResponse) -> Result<(), ValidationError> {
    require_id("requestId", &response.request_id)?;
    require_id("driverId", &response.driver_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intake() -> DispatchIntake {
        DispatchIntake {
            request_id: "req-1".to_string(),
            user_id: "user-1".to_string(),
            pickup_lat: 12.9716,
            pickup_lon: 77.5946,
            dropoff_lat: 12.9279,
            dropoff_lon: 77.6271,
            price: 110.0,
            driver_ids: vec!["d1".to_string()],
            drivers: Vec::new(),
            timeout_seconds: None,
            expires_at: None,
        }
    }

    #[test]
    fn search_response_uses_camel_case_and_omits_missing_tag() {
        let response = DriverSearchResponse {
            request_id: "req-1".to_string(),
            user_id: "user-1".to_string(),
            drivers: vec![DriverLocation {
                driver_id: "d1".to_string(),
                lat: 1.0,
                lon: 2.0,
            }],
            message_type: None,
        };

        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(
            value,
            json!({
                "requestId": "req-1",
                "userId": "user-1",
                "drivers": [{ "driverId": "d1", "lat": 1.0, "lon": 2.0 }],
            })
        );
    }

    #[test]
    fn untagged_response_without_drivers_field_decodes_as_empty() {
        let response: DriverSearchResponse =
            serde_json::from_value(json!({ "requestId": "r", "userId": "u" })).expect("decode");
        assert!(response.drivers.is_empty());
        assert_eq!(response.message_type, None);
    }

    #[test]
    fn tagged_constructors_set_message_type() {
        assert_eq!(
            DriverSearchResponse::timeout("r", "u").message_type,
            Some(ResponseKind::Timeout)
        );
        let value = serde_json::to_value(DriverSearchResponse::no_drivers("r", "u")).expect("json");
        assert_eq!(value["messageType"], "NO_DRIVERS");
    }

    #[test]
    fn driver_action_parses_case_insensitively() {
        let response: DriverResponse = serde_json::from_value(json!({
            "requestId": "req-1",
            "driverId": "d1",
            "action": "accept",
        }))
        .expect("decode");
        assert_eq!(response.action, DriverAction::Accept);

        let error = serde_json::from_value::<DriverResponse>(json!({
            "requestId": "req-1",
            "driverId": "d1",
            "action": "maybe",
        }))
        .expect_err("unknown action");
        assert!(error.to_string().contains("ACCEPT or REJECT"));
    }

    #[test]
    fn dispatch_intake_defaults_timeout_to_sixty_seconds() {
        let decoded: DispatchIntake = serde_json::from_value(json!({
            "requestId": "req-1",
            "userId": "user-1",
            "pickupLat": 1.0,
            "pickupLon": 1.0,
            "dropoffLat": 1.0,
            "dropoffLon": 1.0,
            "price": 50.0,
            "driverIds": ["d1"],
        }))
        .expect("decode");
        assert_eq!(decoded.timeout_secs(), DEFAULT_OFFER_TIMEOUT_SECS);
        assert!(decoded.drivers.is_empty());
        assert_eq!(decoded.expires_at, None);
    }

    #[test]
    fn search_request_carries_the_rider_deadline_only_when_set() {
        let mut request = DriverSearchRequest {
            request_id: "req-1".to_string(),
            user_id: "user-1".to_string(),
            pickup_lat: 1.0,
            pickup_lon: 1.0,
            dropoff_lat: 2.0,
            dropoff_lon: 2.0,
            price: 50.0,
            expires_at: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("expiresAt").is_none());

        request.expires_at = Some(1_740_819_660_000);
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["expiresAt"], 1_740_819_660_000_i64);
    }

    #[test]
    fn validation_rejects_out_of_range_coordinates() {
        let request = CreateRideRequest {
            user_id: "user-1".to_string(),
            pickup_lat: 91.0,
            pickup_lon: 0.0,
            dropoff_lat: 0.0,
            dropoff_lon: 0.0,
            pickup_time: None,
        };
        let error = validate_create_ride_request(&request).expect_err("invalid latitude");
        assert!(error.message().starts_with("pickup latitude"));
    }

    #[test]
    fn validation_rejects_blank_ids_and_zero_timeout() {
        let mut blank = intake();
        blank.user_id = "  ".to_string();
        assert_eq!(
            validate_dispatch_intake(&blank).expect_err("blank user").message(),
            "userId cannot be empty"
        );

        let mut zero = intake();
        zero.timeout_seconds = Some(0);
        assert!(validate_dispatch_intake(&zero).is_err());

        assert!(validate_dispatch_intake(&intake()).is_ok());
    }
}
