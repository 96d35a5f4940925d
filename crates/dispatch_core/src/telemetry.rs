//! Protocol counters, shared by the gateway, the broadcaster and the workers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    requests_initiated: AtomicU64,
    send_failures: AtomicU64,
    candidate_sets_stored: AtomicU64,
    no_drivers: AtomicU64,
    timeouts: AtomicU64,
    acceptances: AtomicU64,
    lost_accept_races: AtomicU64,
    offers_sent: AtomicU64,
    bookings_confirmed: AtomicU64,
    bookings_failed: AtomicU64,
    ignored_messages: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub requests_initiated: u64,
    pub send_failures: u64,
    pub candidate_sets_stored: u64,
    pub no_drivers: u64,
    pub timeouts: u64,
    pub acceptances: u64,
    pub lost_accept_races: u64,
    pub offers_sent: u64,
    pub bookings_confirmed: u64,
    pub bookings_failed: u64,
    pub ignored_messages: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl DispatchTelemetry {
    pub fn request_initiated(&self) {
        bump(&self.requests_initiated, 1);
    }

    pub fn send_failed(&self) {
        bump(&self.send_failures, 1);
    }

    pub fn candidate_set_stored(&self) {
        bump(&self.candidate_sets_stored, 1);
    }

    pub fn no_drivers(&self) {
        bump(&self.no_drivers, 1);
    }

    pub fn timed_out(&self) {
        bump(&self.timeouts, 1);
    }

    pub fn accepted(&self) {
        bump(&self.acceptances, 1);
    }

    pub fn lost_accept_race(&self) {
        bump(&self.lost_accept_races, 1);
    }

    pub fn offers_sent(&self, count: usize) {
        bump(&self.offers_sent, count as u64);
    }

    pub fn booking_confirmed(&self) {
        bump(&self.bookings_confirmed, 1);
    }

    pub fn booking_failed(&self) {
        bump(&self.bookings_failed, 1);
    }

    pub fn message_ignored(&self) {
        bump(&self.ignored_messages, 1);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TelemetrySnapshot {
            requests_initiated: load(&self.requests_initiated),
            send_failures: load(&self.send_failures),
            candidate_sets_stored: load(&self.candidate_sets_stored),
            no_drivers: load(&self.no_drivers),
            timeouts: load(&self.timeouts),
            acceptances: load(&self.acceptances),
            lost_accept_races: load(&self.lost_accept_races),
            offers_sent: load(&self.offers_sent),
            bookings_confirmed: load(&self.bookings_confirmed),
            bookings_failed: load(&self.bookings_failed),
            ignored_messages: load(&self.ignored_messages),
        }
    }
}
