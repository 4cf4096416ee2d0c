use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use forum_bridge::config::Configuration;
use forum_bridge::{AppState, app, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = std::env::var("CONFIG_PATH").map(PathBuf::from).unwrap_or_default();
    let (config, unreadable) = match Configuration::default().path(path).read() {
        Ok(config) => (config, None),
        Err(err) => (Configuration::default(), Some(err)),
    };
    let config = config.finish();

    let guard = telemetry::init(
        config
            .as_ref()
            .ok()
            .and_then(|config| config.telemetry.otlp_endpoint.as_deref()),
    )?;

    if let Some(err) = unreadable {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid, using defaults");
    }

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return Err(err.into());
        },
    };

    let metrics = if config.telemetry.metrics {
        Some(telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    let (state, worker) = AppState::new(Arc::clone(&config), metrics)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, forum = %config.forum.url, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    guard.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
