//! Strava OAuth token rotation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use strava_ghost_common::AppResult;

use super::secrets::{SharedSecretStore, names};
use super::strava::{ActivityApi, OAuthCredentials};

/// Exchanges the stored refresh token for a new token pair and stores both.
#[derive(Clone)]
pub struct TokenRefreshService {
    secrets: SharedSecretStore,
    activities: Arc<dyn ActivityApi>,
    prune_old_versions: bool,
}

impl TokenRefreshService {
    /// Create a new refresh service.
    #[must_use]
    pub fn new(
        secrets: SharedSecretStore,
        activities: Arc<dyn ActivityApi>,
        prune_old_versions: bool,
    ) -> Self {
        Self {
            secrets,
            activities,
            prune_old_versions,
        }
    }

    async fn credentials(&self) -> AppResult<OAuthCredentials> {
        Ok(OAuthCredentials {
            client_id: self.secrets.get(names::STRAVA_CLIENT_ID).await?,
            client_secret: self.secrets.get(names::STRAVA_CLIENT_SECRET).await?,
            refresh_token: self.secrets.get(names::STRAVA_REFRESH_TOKEN).await?,
        })
    }

    /// Rotate the Strava tokens.
    ///
    /// Makes exactly one OAuth call. The access token is written before the
    /// refresh token; if the second write fails the old refresh token stays
    /// current, which Strava keeps honouring until it is used successfully.
    pub async fn refresh(&self) -> AppResult<()> {
        let credentials = self.credentials().await?;
        let grant = self.activities.exchange_refresh_token(&credentials).await?;

        self.secrets
            .set(names::STRAVA_ACCESS_TOKEN, &grant.access_token)
            .await?;
        self.secrets
            .set(names::STRAVA_REFRESH_TOKEN, &grant.refresh_token)
            .await?;

        tracing::info!(expires_at = ?grant.expires_at, "Stored refreshed Strava tokens");

        if self.prune_old_versions {
            for name in [names::STRAVA_ACCESS_TOKEN, names::STRAVA_REFRESH_TOKEN] {
                self.secrets.prune_old_versions(name).await?;
            }
        }

        Ok(())
    }
}

/// Refresh tokens on a fixed period until the task is dropped.
///
/// The first tick fires immediately.
pub async fn run_refresh_scheduler(period: Duration, service: TokenRefreshService) {
    let mut interval = interval(period);
    loop {
        interval.tick().await;
        match service.refresh().await {
            Ok(()) => tracing::info!("Scheduled token refresh succeeded"),
            Err(e) => tracing::error!(error = %e, "Scheduled token refresh failed"),
        }
    }
}
