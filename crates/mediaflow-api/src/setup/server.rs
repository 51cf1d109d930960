//! Server startup and graceful shutdown

use crate::state::AppState;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;

/// Serve until Ctrl+C or SIGTERM, then stop the transcode dispatcher.
///
/// Running transcodes are cancelled and end `Failed`; queued ones stay
/// `Pending`.
pub async fn start_server(state: Arc<AppState>, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.server_port);
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        environment = %state.config.environment,
        storage = %state.config.storage.backend,
        record_store = %state.config.record_store,
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.dispatcher.shutdown().await;
    // runs that outlived the grace period stop waiting for a slot
    state.transcode_slots.close();
    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
