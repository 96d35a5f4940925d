//! Runtime knobs for the dispatch protocol.

use std::time::Duration;

use dispatch_contract::ValidationError;
use h3o::Resolution;
use serde::{Deserialize, Serialize};

use crate::pricing::PricingConfig;

pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_REQUEST_TTL_SECS: u64 = 60;
/// Offer window the matcher asks for; kept below the request TTL so a
/// driver's answer lands while the rider is still waiting.
pub const DEFAULT_MATCH_OFFER_TIMEOUT_SECS: u64 = 50;
pub const DEFAULT_OUTCOME_GRACE_SECS: u64 = 30;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OUTCOME_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_H3_RESOLUTION: u8 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Search radius around the pickup point.
    pub search_radius_km: f64,
    /// Lifetime of a pending ride request; `status` reports NOT_FOUND afterwards
    /// until a terminal outcome arrives.
    pub request_ttl_secs: u64,
    /// How long a lapsed request still accepts a late ACCEPT or TIMEOUT
    /// before the sweep closes it as TIMEOUT.
    pub outcome_grace_secs: u64,
    /// Bounded wait for the bus to accept an outbound message.
    pub send_timeout_ms: u64,
    /// Offer window requested by the matcher and used when an intake omits
    /// `timeoutSeconds`. Must be shorter than `request_ttl_secs`.
    pub offer_timeout_secs: u64,
    pub h3_resolution: u8,
    /// Terminal outcomes remembered for status queries after cleanup.
    pub outcome_cache_capacity: usize,
    pub sweep_interval_secs: u64,
    /// Caps the offer fan-out to the nearest N drivers.
    pub max_candidates: Option<usize>,
    pub pricing: PricingConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_km: DEFAULT_SEARCH_RADIUS_KM,
            request_ttl_secs: DEFAULT_REQUEST_TTL_SECS,
            outcome_grace_secs: DEFAULT_OUTCOME_GRACE_SECS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            offer_timeout_secs: DEFAULT_MATCH_OFFER_TIMEOUT_SECS,
            h3_resolution: DEFAULT_H3_RESOLUTION,
            outcome_cache_capacity: DEFAULT_OUTCOME_CACHE_CAPACITY,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_candidates: None,
            pricing: PricingConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.search_radius_km.is_finite() || self.search_radius_km <= 0.0 {
            return Err(ValidationError::new(
                "search radius must be a positive number of kilometres",
            ));
        }
        if self.request_ttl_secs == 0 {
            return Err(ValidationError::new("request TTL must be at least 1 second"));
        }
        if self.send_timeout_ms == 0 {
            return Err(ValidationError::new("send timeout must be positive"));
        }
        if self.offer_timeout_secs == 0 {
            return Err(ValidationError::new(
                "offer timeout must be at least 1 second",
            ));
        }
        if self.offer_timeout_secs >= self.request_ttl_secs {
            return Err(ValidationError::new(format!(
                "offer timeout ({}s) must be shorter than the request TTL ({}s)",
                self.offer_timeout_secs, self.request_ttl_secs
            )));
        }
        if self.outcome_grace_secs == 0 {
            return Err(ValidationError::new("outcome grace must be at least 1 second"));
        }
        if Resolution::try_from(self.h3_resolution).is_err() {
            return Err(ValidationError::new(format!(
                "h3 resolution must be within 0..=15, got {}",
                self.h3_resolution
            )));
        }
        if self.outcome_cache_capacity == 0 {
            return Err(ValidationError::new(
                "outcome cache capacity must be positive",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::new("sweep interval must be positive"));
        }
        if self.max_candidates == Some(0) {
            return Err(ValidationError::new("max candidates must be positive"));
        }
        let pricing = &self.pricing;
        if !pricing.base_fare.is_finite()
            || pricing.base_fare < 0.0
            || !pricing.per_km_rate.is_finite()
            || pricing.per_km_rate < 0.0
        {
            return Err(ValidationError::new(
                "pricing constants must be non-negative finite numbers",
            ));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Result<Resolution, ValidationError> {
        Resolution::try_from(self.h3_resolution).map_err(|_| {
            ValidationError::new(format!("invalid h3 resolution {}", self.h3_resolution))
        })
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn request_ttl(&self) -> chrono::Duration {
        // capped at a year, well inside chrono's range
        chrono::Duration::seconds(self.request_ttl_secs.min(365 * 24 * 3_600) as i64)
    }

    pub fn outcome_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.outcome_grace_secs.min(365 * 24 * 3_600) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
