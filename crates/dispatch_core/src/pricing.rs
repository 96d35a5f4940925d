//! Distance-based fare estimate quoted when a ride request is created.

use serde::{Deserialize, Serialize};

use crate::spatial::{haversine_km, GeoPoint};

/// Base fare in currency units.
pub const BASE_FARE: f64 = 50.0;

/// Per-kilometer rate in currency units.
pub const PER_KM_RATE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub base_fare: f64,
    pub per_km_rate: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare: BASE_FARE,
            per_km_rate: PER_KM_RATE,
        }
    }
}

impl PricingConfig {
    /// Formula: `fare = base_fare + haversine_km(pickup, dropoff) * per_km_rate`
    pub fn estimate_price(&self, pickup: GeoPoint, dropoff: GeoPoint) -> f64 {
        self.base_fare + haversine_km(pickup, dropoff) * self.per_km_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fare_includes_base_and_distance() {
        let pricing = PricingConfig::default();
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let dropoff = GeoPoint::new(12.9279, 77.6271);

        let distance = haversine_km(pickup, dropoff);
        let fare = pricing.estimate_price(pickup, dropoff);
        assert!((fare - (BASE_FARE + distance * PER_KM_RATE)).abs() < 1e-9);
        assert!((distance - 6.0).abs() < 0.01, "distance was {distance}");
        assert!((fare - 110.01).abs() < 0.01, "fare was {fare}");
    }

    #[test]
    fn estimate_is_deterministic_and_zero_distance_costs_base_fare() {
        let pricing = PricingConfig::default();
        let point = GeoPoint::new(52.52, 13.405);
        let other = GeoPoint::new(52.50, 13.45);
        assert_eq!(
            pricing.estimate_price(point, other),
            pricing.estimate_price(point, other)
        );
        assert_eq!(pricing.estimate_price(point, point), BASE_FARE);
    }
}
