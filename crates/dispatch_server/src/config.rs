use std::net::SocketAddr;

use anyhow::{anyhow, bail};
use clap::{Parser, ValueEnum};
use dispatch_core::config::{
    DEFAULT_H3_RESOLUTION, DEFAULT_MATCH_OFFER_TIMEOUT_SECS, DEFAULT_OUTCOME_CACHE_CAPACITY,
    DEFAULT_OUTCOME_GRACE_SECS, DEFAULT_REQUEST_TTL_SECS, DEFAULT_SEARCH_RADIUS_KM,
    DEFAULT_SEND_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use dispatch_core::pricing::{PricingConfig, BASE_FARE, PER_KM_RATE};
use dispatch_core::DispatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `dispatch-server` binary.
///
/// Every value can come from a flag or a `DISPATCH_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dispatch-server",
    version,
    about = "Ride-matching dispatch service: rider gateway, geo matcher and offer broadcaster"
)]
pub struct CliArgs {
    /// Address the HTTP surface listens on.
    #[arg(long, env = "DISPATCH_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Radius searched around a pickup point, in kilometres.
    #[arg(long, env = "DISPATCH_SEARCH_RADIUS_KM", default_value_t = DEFAULT_SEARCH_RADIUS_KM)]
    pub search_radius_km: f64,

    /// How long a ride request stays answerable before it reads as NOT_FOUND.
    #[arg(long, env = "DISPATCH_REQUEST_TTL_SECS", default_value_t = DEFAULT_REQUEST_TTL_SECS)]
    pub request_ttl_secs: u64,

    /// Extra time a lapsed request waits for a late driver answer.
    #[arg(long, env = "DISPATCH_OUTCOME_GRACE_SECS", default_value_t = DEFAULT_OUTCOME_GRACE_SECS)]
    pub outcome_grace_secs: u64,

    /// Bounded wait for the bus to accept an outbound message.
    #[arg(long, env = "DISPATCH_SEND_TIMEOUT_MS", default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub send_timeout_ms: u64,

    /// Offer window for matched rides; must be shorter than the request TTL.
    #[arg(long, env = "DISPATCH_OFFER_TIMEOUT_SECS", default_value_t = DEFAULT_MATCH_OFFER_TIMEOUT_SECS)]
    pub offer_timeout_secs: u64,

    /// H3 resolution of the driver index (0..=15).
    #[arg(long, env = "DISPATCH_H3_RESOLUTION", default_value_t = DEFAULT_H3_RESOLUTION)]
    pub h3_resolution: u8,

    /// Terminal outcomes kept for status queries after cleanup.
    #[arg(long, env = "DISPATCH_OUTCOME_CACHE", default_value_t = DEFAULT_OUTCOME_CACHE_CAPACITY)]
    pub outcome_cache_capacity: usize,

    /// Period of the stale-request sweep.
    #[arg(long, env = "DISPATCH_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// Offer each ride to at most this many of the nearest drivers.
    #[arg(long, env = "DISPATCH_MAX_CANDIDATES")]
    pub max_candidates: Option<usize>,

    #[arg(long, env = "DISPATCH_BASE_FARE", default_value_t = BASE_FARE)]
    pub base_fare: f64,

    #[arg(long, env = "DISPATCH_PER_KM_RATE", default_value_t = PER_KM_RATE)]
    pub per_km_rate: f64,

    /// Capacity of each bus topic queue.
    #[arg(long, env = "DISPATCH_TOPIC_CAPACITY", default_value_t = dispatch_core::bus::DEFAULT_TOPIC_CAPACITY)]
    pub topic_capacity: usize,

    #[arg(long, env = "DISPATCH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub topic_capacity: usize,
    pub log_format: LogFormat,
    pub dispatch: DispatchConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .map_err(|err| anyhow!("DISPATCH_LISTEN_ADDR '{}' is invalid: {err}", args.listen_addr))?;

        if args.topic_capacity == 0 {
            bail!("DISPATCH_TOPIC_CAPACITY must be greater than 0");
        }

        let dispatch = DispatchConfig {
            search_radius_km: args.search_radius_km,
            request_ttl_secs: args.request_ttl_secs,
            outcome_grace_secs: args.outcome_grace_secs,
            send_timeout_ms: args.send_timeout_ms,
            offer_timeout_secs: args.offer_timeout_secs,
            h3_resolution: args.h3_resolution,
            outcome_cache_capacity: args.outcome_cache_capacity,
            sweep_interval_secs: args.sweep_interval_secs,
            max_candidates: args.max_candidates,
            pricing: PricingConfig {
                base_fare: args.base_fare,
                per_km_rate: args.per_km_rate,
            },
        };
        dispatch
            .validate()
            .map_err(|err| anyhow!("invalid dispatch configuration: {err}"))?;

        Ok(Self {
            listen_addr,
            topic_capacity: args.topic_capacity,
            log_format: args.log_format,
            dispatch,
        })
    }
}
