//! Server startup and graceful shutdown

use anyhow::Result;
use axum::Router;
use mediabucket_core::Config;
use std::future::Future;
use std::time::Instant;

/// Start the server with graceful shutdown
///
/// Once a shutdown signal arrives no new connections are accepted; serves
/// already streaming run to completion before this returns.
pub async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port());
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let started = Instant::now();

    tracing::info!(
        bucket = %config.storage().bucket,
        serve_base_path = %config.serve_base_path(),
        environment = %config.environment(),
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        uptime_secs = started.elapsed().as_secs(),
        "In-flight serves drained, server stopped"
    );
    Ok(())
}

/// Resolves on the first of Ctrl+C or SIGTERM.
///
/// A signal source that cannot be installed is logged and never fires, so
/// the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = first_signal(ctrl_c, terminate).await;
    tracing::info!(signal, "Shutdown requested, draining in-flight serves");
}

async fn first_signal(
    ctrl_c: impl Future<Output = ()>,
    terminate: impl Future<Output = ()>,
) -> &'static str {
    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    #[tokio::test]
    async fn test_first_signal_names_the_source() {
        assert_eq!(first_signal(async {}, pending()).await, "SIGINT");
        assert_eq!(first_signal(pending(), async {}).await, "SIGTERM");
    }
}
