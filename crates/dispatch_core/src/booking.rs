//! Booking handoff. Persisting bookings belongs to another service; the
//! protocol only needs to know whether the handoff succeeded.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::spatial::GeoPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub request_id: String,
    pub user_id: String,
    pub driver_id: String,
    pub price: f64,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub booking_id: u64,
}

#[async_trait]
pub trait BookingMaterializer: Send + Sync {
    async fn materialize(&self, request: BookingRequest) -> Result<BookingReceipt, BookingError>;
}

/// Keeps bookings in memory and hands out increasing ids starting at 1.
/// One booking per request id.
#[derive(Debug)]
pub struct InMemoryBookings {
    next_id: AtomicU64,
    bookings: DashMap<String, (BookingReceipt, BookingRequest)>,
}

impl Default for InMemoryBookings {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            bookings: DashMap::new(),
        }
    }
}

impl InMemoryBookings {
    pub fn get(&self, request_id: &str) -> Option<(BookingReceipt, BookingRequest)> {
        self.bookings.get(request_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

#[async_trait]
impl BookingMaterializer for InMemoryBookings {
    async fn materialize(&self, request: BookingRequest) -> Result<BookingReceipt, BookingError> {
        match self.bookings.entry(request.request_id.clone()) {
            Entry::Occupied(_) => Err(BookingError::Duplicate(request.request_id)),
            Entry::Vacant(slot) => {
                let receipt = BookingReceipt {
                    booking_id: self.next_id.fetch_add(1, Ordering::Relaxed),
                };
                tracing::info!(
                    request_id = %request.request_id,
                    driver_id = %request.driver_id,
                    booking_id = receipt.booking_id,
                    price = request.price,
                    "booking created"
                );
                slot.insert((receipt, request));
                Ok(receipt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> BookingRequest {
        BookingRequest {
            request_id: id.to_string(),
            user_id: "u1".to_string(),
            driver_id: "d1".to_string(),
            price: 110.0,
            pickup: GeoPoint::new(12.9716, 77.5946),
            dropoff: GeoPoint::new(12.9279, 77.6271),
            pickup_time: None,
        }
    }

    #[tokio::test]
    async fn ids_increase_and_duplicates_are_rejected() {
        let bookings = InMemoryBookings::default();
        let first = bookings.materialize(request("a")).await.expect("first");
        let second = bookings.materialize(request("b")).await.expect("second");
        assert_eq!(first.booking_id, 1);
        assert_eq!(second.booking_id, 2);

        assert_eq!(
            bookings.materialize(request("a")).await,
            Err(BookingError::Duplicate("a".to_string()))
        );
        assert_eq!(bookings.len(), 2);
        assert_eq!(bookings.get("b").map(|(r, _)| r.booking_id), Some(2));
    }
}
