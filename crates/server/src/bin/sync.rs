//! Webhook deployment: receives Strava events and mirrors them into Ghost.

use std::sync::Arc;

use strava_ghost_api::{WebhookState, webhook_router};
use strava_ghost_core::services::secrets;
use strava_ghost_core::{GhostClient, StravaClient, SyncConfig, SyncService};
use strava_ghost_server::{BoxError, init_tracing, load_config, serve};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = load_config()?;
    init_tracing(&config.logging);

    info!("Starting strava-ghost webhook server...");

    let secrets = secrets::from_config(&config.secrets)?;
    let strava = Arc::new(StravaClient::new(&config.strava, secrets.clone())?);
    let ghost = Arc::new(GhostClient::from_secrets(&config.ghost, secrets.as_ref()).await?);
    info!("Ghost client initialized");

    let sync_config = SyncConfig::from_settings(&config.sync, &config.ghost);
    info!(
        create_delay_secs = sync_config.create_delay.as_secs(),
        max_attempts = sync_config.retry.max_attempts,
        worst_case_backoff_ms = sync_config.retry.worst_case_delay().as_millis() as u64,
        tag = %sync_config.tag,
        "Sync configured"
    );
    let sync = SyncService::new(strava, ghost, sync_config);

    let app = webhook_router()
        .layer(TraceLayer::new_for_http())
        .with_state(WebhookState { sync, secrets });

    serve(app, &config.server).await
}
