//! Process bootstrap shared by the strava-ghost binaries.

use std::net::SocketAddr;

use axum::Router;
use strava_ghost_common::{AppResult, Config};
use strava_ghost_common::config::{LoggingConfig, ServerConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Boxed error returned from `main`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Load configuration from `STRAVA_GHOST_CONFIG` if set, otherwise from the
/// layered defaults.
pub fn load_config() -> AppResult<Config> {
    let config = match std::env::var("STRAVA_GHOST_CONFIG") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::load()?,
    };
    Ok(config)
}

/// Install the global tracing subscriber.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "strava_ghost=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// The hosting platform sends SIGTERM before stopping an instance.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Bind and serve until a shutdown signal arrives.
pub async fn serve(app: Router, server: &ServerConfig) -> Result<(), BoxError> {
    let ip = server
        .host
        .parse::<std::net::IpAddr>()
        .map_err(|e| format!("Invalid server.host {}: {e}", server.host))?;
    let addr = SocketAddr::new(ip, server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
