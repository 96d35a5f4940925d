mod support;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use dispatch_contract::{
    DispatchIntake, DispatchStatus, DriverAction, DriverResponse, ResponseKind, RideStatus,
    RiderNotification,
};
use dispatch_core::clock::Clock;
use dispatch_core::notify::Delivery;
use dispatch_core::ResponseOutcome;
use support::harness::{drain, north_of, HarnessBuilder, PICKUP};

fn respond(request_id: &str, driver_id: &str, action: DriverAction) -> DriverResponse {
    DriverResponse {
        request_id: request_id.to_string(),
        driver_id: driver_id.to_string(),
        action,
    }
}

fn timeouts(harness: &support::harness::Harness, request_id: &str) -> usize {
    harness
        .bus
        .responses_for(request_id)
        .iter()
        .filter(|r| r.message_type == Some(ResponseKind::Timeout))
        .count()
}

#[tokio::test(start_paused = true)]
async fn unanswered_offer_times_out_once_and_late_accept_is_a_no_op() {
    let harness = HarnessBuilder::new().with_offer_timeout_secs(30).build();
    for (i, id) in ["d1", "d2", "d3"].iter().enumerate() {
        harness.place_driver(id, None, north_of(PICKUP, 0.5 + i as f64));
    }

    let request_id = harness.initiate("rider-1").await;
    let mut rider = harness.hub.subscribe_rider(&request_id);
    harness.pump().await;
    assert_eq!(harness.gateway.status(&request_id).status, RideStatus::DriverFound);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(
        harness.broadcaster.status(&request_id).status,
        DispatchStatus::Pending
    );
    assert_eq!(timeouts(&harness, &request_id), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(timeouts(&harness, &request_id), 1);
    assert_eq!(harness.broadcaster.active_count(), 0);
    assert_eq!(
        harness.broadcaster.status(&request_id).status,
        DispatchStatus::Timeout
    );

    harness.pump().await;
    assert_eq!(harness.gateway.status(&request_id).status, RideStatus::Timeout);
    assert_eq!(harness.gateway.pending_count(), 0);
    assert_eq!(harness.gateway.candidate_set_count(), 0);

    let late = harness
        .broadcaster
        .on_driver_response(respond(&request_id, "d1", DriverAction::Accept))
        .await
        .expect("response");
    assert_eq!(late, ResponseOutcome::AlreadyResolved);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(timeouts(&harness, &request_id), 1);
    assert!(harness.bookings.is_empty());

    let pushed = drain(&mut rider);
    assert_eq!(
        pushed.last(),
        Some(&Delivery::Rider(RiderNotification::timeout(&request_id)))
    );
    assert_eq!(harness.telemetry.snapshot().timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn acceptance_disarms_the_offer_timer() {
    let harness = HarnessBuilder::new().with_offer_timeout_secs(30).build();
    harness.place_driver("d1", Some("Asha"), north_of(PICKUP, 0.5));

    let request_id = harness.initiate("rider-1").await;
    harness.pump().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let outcome = harness
        .broadcaster
        .on_driver_response(respond(&request_id, "d1", DriverAction::Accept))
        .await
        .expect("response");
    assert_eq!(outcome, ResponseOutcome::Accepted);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(timeouts(&harness, &request_id), 0);
    assert_eq!(
        harness.broadcaster.status(&request_id).status,
        DispatchStatus::Accepted
    );

    harness.pump().await;
    assert_eq!(harness.gateway.status(&request_id).status, RideStatus::Accepted);
}

#[tokio::test(start_paused = true)]
async fn expiry_after_acceptance_is_a_safe_no_op() {
    let harness = HarnessBuilder::new().with_offer_timeout_secs(30).build();
    harness.place_driver("d1", None, north_of(PICKUP, 0.5));
    let request_id = harness.initiate("rider-1").await;
    harness.pump().await;

    harness
        .broadcaster
        .on_driver_response(respond(&request_id, "d1", DriverAction::Accept))
        .await
        .expect("response");

    // the timer losing the cancel race lands here
    assert!(!harness.broadcaster.expire(&request_id).await);
    assert_eq!(timeouts(&harness, &request_id), 0);
    assert_eq!(
        harness.broadcaster.accepted_driver(&request_id).as_deref(),
        Some("d1")
    );
}

#[tokio::test(start_paused = true)]
async fn offer_expiry_timestamp_matches_the_window() {
    let harness = HarnessBuilder::new().with_offer_timeout_secs(45).build();
    harness.place_driver("d1", None, north_of(PICKUP, 0.5));
    let mut offers = harness.hub.subscribe_driver("d1");

    harness.initiate("rider-1").await;
    harness.pump().await;

    let delivered = drain(&mut offers);
    let Some(Delivery::Offer(offer)) = delivered.first() else {
        panic!("expected an offer, got {delivered:?}");
    };
    let expected = harness.clock.now().timestamp_millis() + 45_000;
    assert_eq!(offer.expires_at, expected);
    assert_eq!(offer.message, "New ride request available");
}

#[tokio::test(start_paused = true)]
async fn offer_window_is_cut_short_by_the_ride_request_ttl() {
    let harness = HarnessBuilder::new().with_offer_timeout_secs(30).build();
    harness.place_driver("d1", None, north_of(PICKUP, 0.5));
    let mut offers = harness.hub.subscribe_driver("d1");

    let request_id = harness.initiate("rider-1").await;
    let mut rider = harness.hub.subscribe_rider(&request_id);
    // the matcher picks the request up with five seconds of TTL left
    harness.clock.advance(ChronoDuration::seconds(55));
    harness.pump().await;

    let delivered = drain(&mut offers);
    let Some(Delivery::Offer(offer)) = delivered.first() else {
        panic!("expected an offer, got {delivered:?}");
    };
    assert_eq!(offer.expires_at, harness.clock.now().timestamp_millis() + 5_000);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(timeouts(&harness, &request_id), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(timeouts(&harness, &request_id), 1);

    harness.pump().await;
    assert_eq!(harness.gateway.status(&request_id).status, RideStatus::Timeout);
    assert_eq!(
        drain(&mut rider).last(),
        Some(&Delivery::Rider(RiderNotification::timeout(&request_id)))
    );
}

#[tokio::test(start_paused = true)]
async fn intake_past_its_deadline_times_out_without_offers() {
    let harness = HarnessBuilder::new().with_offer_timeout_secs(30).build();
    let mut offers = harness.hub.subscribe_driver("d1");
    let intake = DispatchIntake {
        request_id: "req-late".to_string(),
        user_id: "rider-1".to_string(),
        pickup_lat: PICKUP.lat,
        pickup_lon: PICKUP.lon,
        dropoff_lat: 12.9279,
        dropoff_lon: 77.6271,
        price: 110.0,
        driver_ids: vec!["d1".to_string()],
        drivers: Vec::new(),
        timeout_seconds: Some(30),
        expires_at: Some(harness.clock.now().timestamp_millis() - 1),
    };

    let notified = harness.broadcaster.intake(intake).await.expect("intake");
    assert_eq!(notified, 0);
    assert!(drain(&mut offers).is_empty());
    assert_eq!(harness.broadcaster.active_count(), 0);
    assert_eq!(timeouts(&harness, "req-late"), 1);
    assert_eq!(
        harness.broadcaster.status("req-late").status,
        DispatchStatus::Timeout
    );

    let late = harness
        .broadcaster
        .on_driver_response(respond("req-late", "d1", DriverAction::Accept))
        .await
        .expect("response");
    assert_eq!(late, ResponseOutcome::AlreadyResolved);
}
