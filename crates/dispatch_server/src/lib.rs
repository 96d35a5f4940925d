//! # dispatch_server
//!
//! Runs the rider gateway, the geo matcher and the dispatch broadcaster in
//! one process over the in-memory bus, and exposes them over HTTP.
//!
//! | Prefix                 | Module                 |
//! |------------------------|------------------------|
//! | `/api/ride-requests`   | [`routes::rides`]      |
//! | `/api/dispatch/*`      | [`routes::dispatch`]   |
//! | `/api/location/*`      | [`routes::location`]   |
//! | `/api/telemetry`, `/health/liveness` | [`routes::ops_router`] |

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod simulation;
pub mod state;
pub mod workers;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::rides::router())
        .merge(routes::dispatch::router())
        .merge(routes::location::router())
        .merge(routes::ops_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
