//! Token refresh deployment: rotates the Strava OAuth tokens on request.

use std::sync::Arc;
use std::time::Duration;

use strava_ghost_api::{RefreshState, refresh_router};
use strava_ghost_core::services::secrets;
use strava_ghost_core::{StravaClient, TokenRefreshService, run_refresh_scheduler};
use strava_ghost_server::{BoxError, init_tracing, load_config, serve};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = load_config()?;
    init_tracing(&config.logging);

    info!("Starting strava-ghost token refresh server...");

    let secrets = secrets::from_config(&config.secrets)?;
    let strava = Arc::new(StravaClient::new(&config.strava, secrets.clone())?);
    let refresher =
        TokenRefreshService::new(secrets, strava, config.refresh.prune_old_versions);

    if let Some(secs) = config.refresh.interval_secs.filter(|secs| *secs > 0) {
        info!(interval_secs = secs, "Starting in-process refresh scheduler");
        tokio::spawn(run_refresh_scheduler(
            Duration::from_secs(secs),
            refresher.clone(),
        ));
    }

    let app = refresh_router()
        .layer(TraceLayer::new_for_http())
        .with_state(RefreshState { refresher });

    serve(app, &config.server).await
}
