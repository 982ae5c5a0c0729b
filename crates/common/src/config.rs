//! Application configuration.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Secret store configuration.
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Strava API configuration.
    #[serde(default)]
    pub strava: StravaConfig,
    /// Ghost Admin API configuration.
    #[serde(default)]
    pub ghost: GhostConfig,
    /// Webhook sync behaviour.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Token refresh behaviour.
    #[serde(default)]
    pub refresh: RefreshSettings,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which secret store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackend {
    /// Google Secret Manager over its REST API.
    #[default]
    Google,
    /// In-process store seeded from [`SecretsConfig::seed`].
    Memory,
}

/// Secret store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: SecretBackend,
    /// Project that namespaces every secret name.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Secret Manager API base URL.
    #[serde(default = "default_secret_manager_endpoint")]
    pub endpoint: String,
    /// Metadata server token URL used when no static token is configured.
    #[serde(default = "default_metadata_token_url")]
    pub metadata_token_url: String,
    /// Static bearer token for Secret Manager (local development).
    #[serde(default)]
    pub access_token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Initial values for the memory backend.
    #[serde(default)]
    pub seed: HashMap<String, String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::default(),
            project_id: None,
            endpoint: default_secret_manager_endpoint(),
            metadata_token_url: default_metadata_token_url(),
            access_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            seed: HashMap::new(),
        }
    }
}

/// Strava API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaConfig {
    /// REST API base URL.
    #[serde(default = "default_strava_api_base")]
    pub api_base: String,
    /// OAuth token endpoint.
    #[serde(default = "default_strava_oauth_url")]
    pub oauth_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for StravaConfig {
    fn default() -> Self {
        Self {
            api_base: default_strava_api_base(),
            oauth_url: default_strava_oauth_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Ghost Admin API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GhostConfig {
    /// Value of the `Accept-Version` header.
    #[serde(default = "default_ghost_api_version")]
    pub api_version: String,
    /// Tag that marks synced posts.
    #[serde(default = "default_ghost_tag")]
    pub tag: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            api_version: default_ghost_api_version(),
            tag: default_ghost_tag(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Webhook sync behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Seconds to wait after a `create` event before fetching the activity.
    #[serde(default = "default_create_delay_secs")]
    pub create_delay_secs: u64,
    /// Total fetch attempts, including the first.
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_fetch_initial_backoff_ms")]
    pub fetch_initial_backoff_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            create_delay_secs: default_create_delay_secs(),
            fetch_max_attempts: default_fetch_max_attempts(),
            fetch_initial_backoff_ms: default_fetch_initial_backoff_ms(),
        }
    }
}

impl SyncSettings {
    /// Delay applied before fetching a newly created activity.
    #[must_use]
    pub const fn create_delay(&self) -> Duration {
        Duration::from_secs(self.create_delay_secs)
    }

    /// Delay before the first fetch retry.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_initial_backoff_ms)
    }
}

/// Token refresh behaviour.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshSettings {
    /// Destroy superseded secret versions after writing new tokens.
    #[serde(default)]
    pub prune_old_versions: bool,
    /// Run the refresh on this interval in-process. Disabled when unset.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_secret_manager_endpoint() -> String {
    "https://secretmanager.googleapis.com/v1".to_string()
}

fn default_metadata_token_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}

fn default_strava_api_base() -> String {
    "https://www.strava.com/api/v3".to_string()
}

fn default_strava_oauth_url() -> String {
    "https://www.strava.com/oauth/token".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

fn default_ghost_api_version() -> String {
    "v5.0".to_string()
}

fn default_ghost_tag() -> String {
    "Strava".to_string()
}

const fn default_create_delay_secs() -> u64 {
    15
}

const fn default_fetch_max_attempts() -> u32 {
    5
}

const fn default_fetch_initial_backoff_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present) into the process environment
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `STRAVA_GHOST_ENV`)
    /// 4. Environment variables with `STRAVA_GHOST_` prefix
    ///
    /// `PORT` and `GOOGLE_CLOUD_PROJECT`, as set by the hosting platform,
    /// act as defaults for the listen port and the secret project.
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("STRAVA_GHOST_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Self::platform_defaults(config::Config::builder())?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("STRAVA_GHOST")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = Self::platform_defaults(config::Config::builder())?
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("STRAVA_GHOST")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    fn platform_defaults(
        mut builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<i64>().ok()) {
            builder = builder.set_default("server.port", port)?;
        }
        if let Ok(project) = std::env::var("GOOGLE_CLOUD_PROJECT") {
            builder = builder.set_default("secrets.project_id", project)?;
        }
        Ok(builder)
    }
}
