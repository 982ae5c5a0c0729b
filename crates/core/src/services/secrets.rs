//! Secret store access.
//!
//! Every credential the handlers need lives in a versioned secret store.
//! Reads always go to the store so a token written by the refresher is
//! picked up by the next webhook without a restart.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use strava_ghost_common::config::{SecretBackend, SecretsConfig};
use strava_ghost_common::{AppError, AppResult};

/// Names of the secrets this system reads and writes.
pub mod names {
    pub const GHOST_URL: &str = "ghost_url";
    pub const GHOST_KEY: &str = "ghost_key";
    pub const STRAVA_VERIFY_TOKEN: &str = "strava_verify_token";
    pub const STRAVA_ACCESS_TOKEN: &str = "strava_access_token";
    pub const STRAVA_REFRESH_TOKEN: &str = "strava_refresh_token";
    pub const STRAVA_CLIENT_ID: &str = "strava_client_id";
    pub const STRAVA_CLIENT_SECRET: &str = "strava_client_secret";
}

/// Lifecycle state of a secret version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    Enabled,
    Disabled,
    Destroyed,
    #[serde(other)]
    Unspecified,
}

/// One version of a named secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVersion {
    /// Fully qualified version name.
    pub name: String,
    pub create_time: DateTime<Utc>,
    pub state: VersionState,
}

/// Versioned secret storage.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the latest enabled version of a secret.
    async fn get(&self, name: &str) -> AppResult<String>;

    /// Add a new version. Older versions are left in place.
    async fn set(&self, name: &str, value: &str) -> AppResult<()>;

    /// List every version of a secret, in any state.
    async fn list_versions(&self, name: &str) -> AppResult<Vec<SecretVersion>>;

    /// Destroy a single version by its fully qualified name.
    async fn destroy_version(&self, version: &SecretVersion) -> AppResult<()>;

    /// Destroy every version except the most recent enabled one.
    async fn prune_old_versions(&self, name: &str) -> AppResult<()> {
        let versions = self.list_versions(name).await?;
        let stale = versions_to_prune(&versions);
        if stale.is_empty() {
            tracing::debug!(secret = name, "No stale secret versions to prune");
            return Ok(());
        }

        for version in stale {
            match self.destroy_version(version).await {
                Ok(()) => {
                    tracing::info!(secret = name, version = %version.name, "Destroyed secret version");
                }
                Err(e) if version.state == VersionState::Destroyed => {
                    tracing::debug!(
                        secret = name,
                        version = %version.name,
                        error = %e,
                        "Version already destroyed"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Shared handle to a secret store.
pub type SharedSecretStore = Arc<dyn SecretStore>;

/// Versions to destroy so only the newest enabled version survives.
///
/// Returns nothing when no version is enabled.
#[must_use]
pub fn versions_to_prune(versions: &[SecretVersion]) -> Vec<&SecretVersion> {
    let Some(keep) = versions
        .iter()
        .filter(|v| v.state == VersionState::Enabled)
        .max_by_key(|v| v.create_time)
    else {
        return Vec::new();
    };

    versions.iter().filter(|v| v.name != keep.name).collect()
}

/// Build the secret store selected by configuration.
pub fn from_config(config: &SecretsConfig) -> AppResult<SharedSecretStore> {
    match config.backend {
        SecretBackend::Google => {
            let project_id = config.project_id.clone().ok_or_else(|| {
                AppError::Config(
                    "secrets.project_id (or GOOGLE_CLOUD_PROJECT) must be set".to_string(),
                )
            })?;
            Ok(Arc::new(GoogleSecretStore::new(config, project_id)?))
        }
        SecretBackend::Memory => Ok(Arc::new(MemorySecretStore::with_secrets(
            config.seed.iter().map(|(k, v)| (k.clone(), v.clone())),
        ))),
    }
}

// ==================== Google Secret Manager ====================

/// Where the Secret Manager bearer token comes from.
enum TokenSource {
    Static(String),
    Metadata {
        url: String,
        cached: RwLock<Option<CachedToken>>,
    },
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Refresh the metadata token this long before it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Google Secret Manager over its v1 REST API.
pub struct GoogleSecretStore {
    http_client: reqwest::Client,
    endpoint: String,
    project_id: String,
    auth: TokenSource,
}

#[derive(Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsResponse {
    #[serde(default)]
    versions: Vec<SecretVersion>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct AddVersionResponse {
    name: String,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl GoogleSecretStore {
    /// Create a store for the given project.
    pub fn new(config: &SecretsConfig, project_id: String) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        let auth = match &config.access_token {
            Some(token) => TokenSource::Static(token.clone()),
            None => TokenSource::Metadata {
                url: config.metadata_token_url.clone(),
                cached: RwLock::new(None),
            },
        };

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id,
            auth,
        })
    }

    fn secret_url(&self, name: &str) -> String {
        format!(
            "{}/projects/{}/secrets/{}",
            self.endpoint, self.project_id, name
        )
    }

    async fn bearer_token(&self) -> AppResult<String> {
        let (url, cached) = match &self.auth {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { url, cached } => (url, cached),
        };

        {
            let cache = cached.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                    return Ok(entry.token.clone());
                }
            }
        }

        let response = self
            .http_client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalService(format!(
                "Metadata server token request failed: {status}"
            )));
        }

        let token: MetadataToken = response.json().await?;
        let entry = CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        };
        *cached.write().await = Some(entry);

        Ok(token.access_token)
    }

    /// Turn a non-success status into an error naming the secret.
    fn status_error(status: reqwest::StatusCode, body: &str, secret: &str) -> AppError {
        if status == reqwest::StatusCode::NOT_FOUND {
            return AppError::SecretNotFound(secret.to_string());
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return AppError::Transient(format!(
                "Secret Manager error for {secret}: {status} - {body}"
            ));
        }
        AppError::ExternalService(format!(
            "Secret Manager error for {secret}: {status} - {body}"
        ))
    }

    async fn check(response: reqwest::Response, secret: &str) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::status_error(status, &body, secret))
    }

    async fn access_version(&self, secret: &str, version_url: &str) -> AppResult<VersionAccess> {
        let token = self.bearer_token().await?;
        let response = self
            .http_client
            .get(format!("{version_url}:access"))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_failed_precondition(status, &body) {
                return Ok(VersionAccess::NotEnabled);
            }
            return Err(Self::status_error(status, &body, secret));
        }
        let body: AccessResponse = response.json().await?;

        let bytes = STANDARD
            .decode(body.payload.data.as_bytes())
            .map_err(|e| AppError::ExternalService(format!("Invalid payload for {secret}: {e}")))?;
        String::from_utf8(bytes)
            .map(VersionAccess::Value)
            .map_err(|e| AppError::ExternalService(format!("Non UTF-8 payload for {secret}: {e}")))
    }
}

/// Outcome of accessing one secret version.
enum VersionAccess {
    Value(String),
    /// The version exists but is disabled or destroyed.
    NotEnabled,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorStatus,
}

#[derive(Deserialize)]
struct GoogleErrorStatus {
    #[serde(default)]
    status: String,
}

/// Secret Manager answers 400 `FAILED_PRECONDITION` when the version is not enabled.
fn is_failed_precondition(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::BAD_REQUEST
        && serde_json::from_str::<GoogleErrorBody>(body)
            .is_ok_and(|b| b.error.status == "FAILED_PRECONDITION")
}

#[async_trait]
impl SecretStore for GoogleSecretStore {
    async fn get(&self, name: &str) -> AppResult<String> {
        let latest = format!("{}/versions/latest", self.secret_url(name));
        if let VersionAccess::Value(value) = self.access_version(name, &latest).await? {
            return Ok(value);
        }

        // "latest" points at the newest version even when it is disabled.
        tracing::debug!(secret = name, "Latest version not enabled, searching older versions");
        let versions = self.list_versions(name).await?;
        let newest = versions
            .iter()
            .filter(|v| v.state == VersionState::Enabled)
            .max_by_key(|v| v.create_time)
            .ok_or_else(|| AppError::SecretNotFound(name.to_string()))?;
        let url = format!("{}/{}", self.endpoint, newest.name);
        match self.access_version(name, &url).await? {
            VersionAccess::Value(value) => Ok(value),
            VersionAccess::NotEnabled => Err(AppError::SecretNotFound(name.to_string())),
        }
    }

    async fn set(&self, name: &str, value: &str) -> AppResult<()> {
        let token = self.bearer_token().await?;
        let response = self
            .http_client
            .post(format!("{}:addVersion", self.secret_url(name)))
            .bearer_auth(token)
            .json(&json!({ "payload": { "data": STANDARD.encode(value.as_bytes()) } }))
            .send()
            .await?;
        let response = Self::check(response, name).await?;
        let version: AddVersionResponse = response.json().await?;

        tracing::info!(secret = name, version = %version.name, "Added secret version");
        Ok(())
    }

    async fn list_versions(&self, name: &str) -> AppResult<Vec<SecretVersion>> {
        let url = format!("{}/versions", self.secret_url(name));
        let mut versions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.bearer_token().await?;
            let mut request = self.http_client.get(&url).bearer_auth(token);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }
            let response = Self::check(request.send().await?, name).await?;
            let page: ListVersionsResponse = response.json().await?;

            versions.extend(page.versions);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(versions)
    }

    async fn destroy_version(&self, version: &SecretVersion) -> AppResult<()> {
        let token = self.bearer_token().await?;
        let response = self
            .http_client
            .post(format!("{}/{}:destroy", self.endpoint, version.name))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        Self::check(response, &version.name).await?;
        Ok(())
    }
}

// ==================== In-memory store ====================

#[derive(Debug, Clone)]
struct StoredVersion {
    value: String,
    version: SecretVersion,
}

#[derive(Debug, Default)]
struct MemoryInner {
    secrets: HashMap<String, Vec<StoredVersion>>,
    writes: Vec<String>,
    last_created: Option<DateTime<Utc>>,
}

/// In-process secret store with the same version semantics as Secret Manager.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one version of each given secret.
    pub fn with_secrets<I>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut inner = MemoryInner::default();
        for (name, value) in secrets {
            Self::push_version(&mut inner, &name, value);
        }
        inner.writes.clear();
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    fn push_version(inner: &mut MemoryInner, name: &str, value: String) {
        // Creation times are strictly increasing so "newest" is unambiguous.
        let mut created = Utc::now();
        if let Some(last) = inner.last_created {
            if created <= last {
                created = last + chrono::Duration::microseconds(1);
            }
        }
        inner.last_created = Some(created);

        let versions = inner.secrets.entry(name.to_string()).or_default();
        let version = SecretVersion {
            name: format!("secrets/{name}/versions/{}", versions.len() + 1),
            create_time: created,
            state: VersionState::Enabled,
        };
        versions.push(StoredVersion { value, version });
        inner.writes.push(name.to_string());
    }

    /// Names passed to [`SecretStore::set`], in call order.
    pub async fn write_history(&self) -> Vec<String> {
        self.inner.read().await.writes.clone()
    }

    /// Mark a version (1-based) as disabled.
    pub async fn disable_version(&self, name: &str, number: usize) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .secrets
            .get_mut(name)
            .and_then(|versions| versions.get_mut(number.wrapping_sub(1)))
            .ok_or_else(|| AppError::SecretNotFound(format!("{name}/versions/{number}")))?;
        stored.version.state = VersionState::Disabled;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> AppResult<String> {
        let inner = self.inner.read().await;
        inner
            .secrets
            .get(name)
            .and_then(|versions| {
                versions
                    .iter()
                    .filter(|s| s.version.state == VersionState::Enabled)
                    .max_by_key(|s| s.version.create_time)
            })
            .map(|s| s.value.clone())
            .ok_or_else(|| AppError::SecretNotFound(name.to_string()))
    }

    async fn set(&self, name: &str, value: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        Self::push_version(&mut inner, name, value.to_string());
        Ok(())
    }

    async fn list_versions(&self, name: &str) -> AppResult<Vec<SecretVersion>> {
        let inner = self.inner.read().await;
        inner
            .secrets
            .get(name)
            .map(|versions| versions.iter().map(|s| s.version.clone()).collect())
            .ok_or_else(|| AppError::SecretNotFound(name.to_string()))
    }

    async fn destroy_version(&self, version: &SecretVersion) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .secrets
            .values_mut()
            .flat_map(|versions| versions.iter_mut())
            .find(|s| s.version.name == version.name)
            .ok_or_else(|| AppError::SecretNotFound(version.name.clone()))?;
        stored.version.state = VersionState::Destroyed;
        stored.value.clear();
        Ok(())
    }
}
