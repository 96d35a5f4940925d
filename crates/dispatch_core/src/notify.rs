//! Addressable push channels for riders and drivers.

use dashmap::DashMap;
use dispatch_contract::{driver_channel, rider_channel, DriverOffer, RiderNotification};
use tokio::sync::broadcast;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Everything that can be pushed to a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Rider(RiderNotification),
    Offer(DriverOffer),
}

/// Fire-and-forget push to riders and drivers. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify_rider(&self, request_id: &str, notification: RiderNotification);
    fn offer_driver(&self, driver_id: &str, offer: &DriverOffer);
}

/// In-process channel registry keyed by address
/// (`user/{requestId}/ride-status`, `driver/{driverId}/ride-requests`).
///
/// Channels are created by the first subscriber. Pushing to an address nobody
/// listens on is dropped silently.
pub struct ChannelHub {
    channels: DashMap<String, broadcast::Sender<Delivery>>,
    capacity: usize,
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, address: &str) -> broadcast::Receiver<Delivery> {
        self.channels
            .entry(address.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_rider(&self, request_id: &str) -> broadcast::Receiver<Delivery> {
        self.subscribe(&rider_channel(request_id))
    }

    pub fn subscribe_driver(&self, driver_id: &str) -> broadcast::Receiver<Delivery> {
        self.subscribe(&driver_channel(driver_id))
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn push(&self, address: String, delivery: Delivery) {
        let Some(tx) = self.channels.get(&address) else {
            tracing::trace!(%address, "no subscriber, dropping push");
            return;
        };
        if tx.send(delivery).is_err() {
            tracing::trace!(%address, "subscribers gone, dropping push");
        }
    }
}

impl Notifier for ChannelHub {
    fn notify_rider(&self, request_id: &str, notification: RiderNotification) {
        self.push(rider_channel(request_id), Delivery::Rider(notification));
    }

    fn offer_driver(&self, driver_id: &str, offer: &DriverOffer) {
        self.push(driver_channel(driver_id), Delivery::Offer(offer.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rider_subscriber_receives_notification() {
        let hub = ChannelHub::default();
        let mut rx = hub.subscribe_rider("req-1");

        hub.notify_rider("req-1", RiderNotification::no_drivers("req-1"));
        hub.notify_rider("req-2", RiderNotification::no_drivers("req-2"));

        let delivery = rx.recv().await.expect("delivery");
        assert_eq!(
            delivery,
            Delivery::Rider(RiderNotification::no_drivers("req-1"))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn push_without_subscriber_is_dropped_and_prune_removes_idle_channels() {
        let hub = ChannelHub::default();
        hub.notify_rider("nobody", RiderNotification::timeout("nobody"));
        assert_eq!(hub.channel_count(), 0);

        let rx = hub.subscribe_driver("d1");
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.prune(), 0);
        drop(rx);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.channel_count(), 0);
    }
}
