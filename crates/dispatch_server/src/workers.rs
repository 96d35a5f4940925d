//! Background tasks: one consumer per bus topic and the stale-request sweeper.
//!
//! Search requests are independent of each other and are handled on their own
//! tasks. Search responses are handled in arrival order so that the candidate
//! list for a request is always applied before its acceptance or timeout.

use dispatch_core::bus::{BusRecord, Topic};
use dispatch_core::pipeline::{handle_search_request, handle_search_response};
use dispatch_core::{DispatchError, SweepStats};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("topic {0} already has a consumer")]
    AlreadyConsumed(Topic),
}

/// Start the consumers and the sweeper. They stop when `shutdown` is cancelled.
pub fn spawn_workers(
    state: &AppState,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, WorkerError> {
    let requests = state
        .bus
        .subscribe(Topic::DriverSearchRequest)
        .ok_or(WorkerError::AlreadyConsumed(Topic::DriverSearchRequest))?;
    let responses = state
        .bus
        .subscribe(Topic::DriverSearchResponse)
        .ok_or(WorkerError::AlreadyConsumed(Topic::DriverSearchResponse))?;

    Ok(vec![
        tokio::spawn(consume_search_requests(
            state.clone(),
            requests,
            shutdown.clone(),
        )),
        tokio::spawn(consume_search_responses(
            state.clone(),
            responses,
            shutdown.clone(),
        )),
        tokio::spawn(sweep_expired(state.clone(), shutdown)),
    ])
}

async fn next_record(
    rx: &mut mpsc::Receiver<BusRecord>,
    shutdown: &CancellationToken,
) -> Option<BusRecord> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        record = rx.recv() => record,
    }
}

async fn consume_search_requests(
    state: AppState,
    mut rx: mpsc::Receiver<BusRecord>,
    shutdown: CancellationToken,
) {
    info!(topic = %Topic::DriverSearchRequest, "consumer started");
    while let Some(record) = next_record(&mut rx, &shutdown).await {
        let state = state.clone();
        tokio::spawn(async move {
            let result = handle_search_request(
                &state.matcher,
                &state.broadcaster,
                state.config.offer_timeout_secs,
                &record,
            )
            .await;
            match result {
                Ok(notified) => debug!(key = %record.key, notified, "search request handled"),
                Err(err) => log_failure(&record, &err),
            }
        });
    }
    info!(topic = %Topic::DriverSearchRequest, "consumer stopped");
}

async fn consume_search_responses(
    state: AppState,
    mut rx: mpsc::Receiver<BusRecord>,
    shutdown: CancellationToken,
) {
    info!(topic = %Topic::DriverSearchResponse, "consumer started");
    while let Some(record) = next_record(&mut rx, &shutdown).await {
        match handle_search_response(&state.gateway, &record).await {
            Ok(Some(status)) => debug!(key = %record.key, ?status, "search response applied"),
            Ok(None) => {}
            Err(err) => log_failure(&record, &err),
        }
    }
    info!(topic = %Topic::DriverSearchResponse, "consumer stopped");
}

fn log_failure(record: &BusRecord, err: &DispatchError) {
    match err {
        // answered upstream with NO_DRIVERS already
        DispatchError::NoCandidates(_) => debug!(key = %record.key, "no drivers near pickup"),
        // decoding failures were logged where they happened
        DispatchError::Malformed { .. } => {}
        err if err.is_client_error() => {
            warn!(topic = %record.topic, key = %record.key, error = %err, "record rejected")
        }
        err => error!(topic = %record.topic, key = %record.key, error = %err, "record handling failed"),
    }
}

async fn sweep_expired(state: AppState, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(state.config.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let swept = state.gateway.sweep_expired();
                let pruned = state.hub.prune();
                if swept != SweepStats::default() || pruned > 0 {
                    debug!(
                        lapsed = swept.lapsed,
                        timed_out = swept.closed,
                        closed_channels = pruned,
                        "sweep finished"
                    );
                }
            }
        }
    }
}
