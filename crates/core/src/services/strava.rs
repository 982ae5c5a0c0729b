//! Strava API client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use strava_ghost_common::config::StravaConfig;
use strava_ghost_common::{AppError, AppResult};

use super::secrets::{SharedSecretStore, names};

/// The parts of a Strava activity that end up in a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDetails {
    /// Activity name.
    pub title: String,
    /// Activity type, used as a post tag (e.g. "Run", "Ride").
    pub activity_type: String,
    /// ID placed in the embed marker.
    pub embed_id: String,
}

impl ActivityDetails {
    /// Public Strava page for this activity.
    #[must_use]
    pub fn canonical_url(&self) -> String {
        format!("https://www.strava.com/activities/{}", self.embed_id)
    }
}

/// Result of a fetch that reached the API and got a definitive answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityFetch {
    /// The activity exists and is readable.
    Found(ActivityDetails),
    /// The API answered with an error body; retrying will not help.
    Rejected(String),
}

/// Client credentials plus the refresh token to exchange.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Token pair returned by the OAuth endpoint.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp at which the access token stops working.
    pub expires_at: Option<i64>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Activity-tracking API.
///
/// `Err` values returned by [`ActivityApi::fetch_activity`] that are
/// [`AppError::Transient`] may be retried by the caller.
#[async_trait]
pub trait ActivityApi: Send + Sync {
    /// Fetch one activity by ID.
    async fn fetch_activity(&self, activity_id: &str) -> AppResult<ActivityFetch>;

    /// Exchange a refresh token for a new token pair.
    async fn exchange_refresh_token(&self, credentials: &OAuthCredentials)
    -> AppResult<TokenGrant>;
}

#[derive(Deserialize)]
struct StravaActivity {
    id: Value,
    name: String,
    #[serde(rename = "type")]
    activity_type: Option<String>,
    sport_type: Option<String>,
}

#[derive(Deserialize)]
struct StravaTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

/// Parse an activity response body into a fetch outcome.
///
/// A body carrying an `errors` field is a rejection; a body that is not the
/// expected shape is treated as a transient decode failure.
pub fn parse_activity_body(body: &Value) -> AppResult<ActivityFetch> {
    if let Some(errors) = body.get("errors") {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Strava API error");
        return Ok(ActivityFetch::Rejected(format!("{message}: {errors}")));
    }

    let activity: StravaActivity = serde_json::from_value(body.clone())
        .map_err(|e| AppError::Transient(format!("Unexpected activity payload: {e}")))?;

    let embed_id = match activity.id {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s,
        other => {
            return Err(AppError::Transient(format!(
                "Unexpected activity id: {other}"
            )));
        }
    };

    let activity_type = activity
        .activity_type
        .or(activity.sport_type)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AppError::Transient(format!("Activity {embed_id} has no type or sport_type"))
        })?;

    Ok(ActivityFetch::Found(ActivityDetails {
        title: activity.name,
        activity_type,
        embed_id,
    }))
}

/// Strava REST and OAuth client.
///
/// The access token is read from the secret store on every fetch so a
/// refresh written by another process takes effect immediately.
pub struct StravaClient {
    http_client: reqwest::Client,
    api_base: String,
    oauth_url: String,
    secrets: SharedSecretStore,
}

impl StravaClient {
    /// Create a new Strava client.
    pub fn new(config: &StravaConfig, secrets: SharedSecretStore) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.clone(),
            secrets,
        })
    }
}

#[async_trait]
impl ActivityApi for StravaClient {
    async fn fetch_activity(&self, activity_id: &str) -> AppResult<ActivityFetch> {
        let access_token = self.secrets.get(names::STRAVA_ACCESS_TOKEN).await?;
        let url = format!("{}/activities/{activity_id}", self.api_base);

        tracing::debug!(activity_id, "Fetching activity from Strava");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AppError::Transient(format!(
                "Strava returned {status} for activity {activity_id}"
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ActivityFetch::Rejected(format!("Strava returned {status}: {body}")));
        }

        let body: Value = response.json().await?;
        parse_activity_body(&body)
    }

    async fn exchange_refresh_token(
        &self,
        credentials: &OAuthCredentials,
    ) -> AppResult<TokenGrant> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&self.oauth_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Strava OAuth request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Strava OAuth error: {status} - {body}"
            )));
        }

        let token: StravaTokenResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("Failed to parse Strava OAuth response: {e}"))
        })?;

        let access_token = token.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AppError::ExternalService("Strava OAuth response missing access_token".to_string())
        })?;
        let refresh_token = token.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AppError::ExternalService("Strava OAuth response missing refresh_token".to_string())
        })?;

        Ok(TokenGrant {
            access_token,
            refresh_token,
            expires_at: token.expires_at,
        })
    }
}
