//! xNode worker entry point
//!
//! Loads configuration, connects to the coordinator and runs until
//! Ctrl-C, SIGTERM or a coordinator `shutdown`.

use std::sync::Arc;

use tokio::sync::watch;
use xnode_daemon::{Daemon, DaemonConfig, StartupError, WsConnector};
use xnode_protocol::init_tracing;

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    init_tracing("xnode_daemon=info,xnode_engine=info,info")?;

    let config = DaemonConfig::load().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    let trust = config.trust_store()?;
    if trust.is_empty() {
        tracing::warn!("No trusted coordinators configured, every assignment will be rejected");
    }

    let connector = Arc::new(WsConnector::new(config.coordinator_url.clone()));
    let daemon = Daemon::new(config, trust, connector);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    daemon.run(shutdown_rx).await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
