//! Drive a synthetic city through the dispatch protocol and print the
//! resulting outcome counts as JSON.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dispatch_core::{DispatchConfig, GeoPoint};
use dispatch_server::config::LogFormat;
use dispatch_server::logging::init_tracing;
use dispatch_server::simulation::{self, SimScenario};
use dispatch_server::state::AppState;
use dispatch_server::workers::spawn_workers;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dispatch_sim", about = "Seeded load run against an in-process dispatch stack")]
struct Args {
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 200)]
    drivers: usize,

    #[arg(long, default_value_t = 100)]
    rides: usize,

    /// Radius around the centre that drivers and pickups are scattered over.
    #[arg(long, default_value_t = 8.0)]
    spread_km: f64,

    #[arg(long, default_value_t = 12.9716)]
    center_lat: f64,

    #[arg(long, default_value_t = 77.5946)]
    center_lon: f64,

    /// Milliseconds between ride submissions.
    #[arg(long, default_value_t = 200)]
    ride_interval_ms: u64,

    #[arg(long, default_value_t = 20)]
    offer_timeout_secs: u64,

    #[arg(long, default_value_t = 5.0)]
    search_radius_km: f64,

    #[arg(long)]
    max_candidates: Option<usize>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let config = DispatchConfig {
        search_radius_km: args.search_radius_km,
        offer_timeout_secs: args.offer_timeout_secs,
        max_candidates: args.max_candidates,
        ..DispatchConfig::default()
    };
    let state = AppState::new(config).context("invalid simulation config")?;

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(&state, shutdown.clone())?;

    let scenario = SimScenario {
        seed: args.seed,
        num_drivers: args.drivers,
        num_rides: args.rides,
        center: GeoPoint::new(args.center_lat, args.center_lon),
        spread_km: args.spread_km,
        ride_interval: Duration::from_millis(args.ride_interval_ms),
        ..SimScenario::default()
    };
    info!(seed = scenario.seed, drivers = scenario.num_drivers, rides = scenario.num_rides, "simulation starting");
    let report = simulation::run(&state, &scenario).await;

    shutdown.cancel();
    state.broadcaster.shutdown();
    for worker in workers {
        if let Err(err) = worker.await {
            error!(error = %err, "worker ended abnormally");
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
