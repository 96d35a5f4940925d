use anyhow::Context;
use clap::Parser;
use dispatch_server::config::{CliArgs, ServerConfig};
use dispatch_server::logging::init_tracing;
use dispatch_server::state::AppState;
use dispatch_server::workers::spawn_workers;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;
    init_tracing(config.log_format)?;

    let state = AppState::builder(config.dispatch.clone())
        .topic_capacity(config.topic_capacity)
        .build()
        .context("building dispatch components")?;

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(&state, shutdown.clone())?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        radius_km = config.dispatch.search_radius_km,
        offer_timeout_secs = config.dispatch.offer_timeout_secs,
        h3_resolution = config.dispatch.h3_resolution,
        "dispatch server listening"
    );

    axum::serve(listener, dispatch_server::app(state.clone()))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Pending offers are abandoned; their drivers simply never hear back.
    state.broadcaster.shutdown();
    for worker in workers {
        if let Err(err) = worker.await {
            error!(error = %err, "worker ended abnormally");
        }
    }
    info!("dispatch server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
    info!("shutting down gracefully");
    shutdown.cancel();
}
