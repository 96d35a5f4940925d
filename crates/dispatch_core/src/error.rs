use dispatch_contract::ValidationError;
use thiserror::Error;

use crate::spatial::SpatialError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("publish to {topic} not acknowledged within {waited_ms}ms")]
    Timeout { topic: String, waited_ms: u64 },
    #[error("topic {0} is closed")]
    Closed(String),
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("booking for request {0} already exists")]
    Duplicate(String),
    #[error("booking store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Spatial(#[from] SpatialError),
    #[error("message bus failure: {0}")]
    Bus(#[from] BusError),
    #[error("no candidate drivers for request {0}")]
    NoCandidates(String),
    #[error("malformed record on {topic}: {reason}")]
    Malformed { topic: String, reason: String },
}

impl DispatchError {
    /// True for failures caused by the caller's input rather than infrastructure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Spatial(_) | Self::NoCandidates(_)
        )
    }
}
