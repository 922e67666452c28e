//! xNode coordinator entry point
//!
//! Loads configuration, binds the HTTP/WebSocket listener and serves until
//! Ctrl-C, then tells connected workers to shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use xnode_coordinator::{
    create_router, sweeper_task, AppState, CoordinatorConfig, StartupError, SweeperConfig,
};
use xnode_protocol::init_tracing;

/// Time given to socket writers to flush the shutdown broadcast.
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    init_tracing("xnode_coordinator=info,tower_http=info,info")?;

    let config = CoordinatorConfig::load().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    let state = AppState::from_config(&config)?;
    let signer = state.scheduler.signer();
    if config.signing_key.is_none() {
        tracing::warn!(
            public_key = %signer.public_key_base64(),
            "No signing key configured, generated an ephemeral one"
        );
    }
    tracing::info!(
        coordinator_id = %signer.coordinator_id(),
        public_key = %signer.public_key_base64(),
        "Coordinator identity"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweeper_task(
        state.scheduler.clone(),
        SweeperConfig::from(&config),
        shutdown_rx,
    ));

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!(%addr, "Starting xNode coordinator");

    let scheduler = state.scheduler.clone();
    let server = axum::serve(listener, create_router(state));
    tokio::select! {
        result = server => {
            result.map_err(StartupError::Serve)?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    scheduler.shutdown();
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    tokio::time::sleep(SHUTDOWN_FLUSH).await;
    Ok(())
}
