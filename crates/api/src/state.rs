//! Router state.

use strava_ghost_core::{SharedSecretStore, SyncService, TokenRefreshService};

/// State for the webhook deployment.
#[derive(Clone)]
pub struct WebhookState {
    /// Event handling.
    pub sync: SyncService,
    /// Read on every verification request.
    pub secrets: SharedSecretStore,
}

/// State for the token refresh deployment.
#[derive(Clone)]
pub struct RefreshState {
    /// Token rotation.
    pub refresher: TokenRefreshService,
}
