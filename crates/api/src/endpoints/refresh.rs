//! Token refresh trigger.

use axum::{extract::State, http::StatusCode, response::Response};

use crate::response::text;
use crate::state::RefreshState;

/// Rotate the Strava tokens. Invoked by an external scheduler.
pub async fn refresh_tokens(State(state): State<RefreshState>) -> Response {
    match state.refresher.refresh().await {
        Ok(()) => {
            tracing::info!("Strava access token refreshed");
            text(StatusCode::OK, "Strava access token refreshed successfully")
        }
        Err(e) => {
            tracing::error!(error = %e, "Error refreshing Strava access token");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error refreshing Strava access token",
            )
        }
    }
}
