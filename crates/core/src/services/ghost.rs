//! Ghost Admin API client.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use strava_ghost_common::config::GhostConfig;
use strava_ghost_common::{AppError, AppResult};

use super::secrets::{SecretStore, names};

/// Lifetime of an admin API token. Ghost rejects anything above five minutes.
const TOKEN_TTL_SECS: i64 = 5 * 60;

/// A post as returned by the Admin API. Only the fields we read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    /// Echoed back on edit as the collision-detection token.
    pub updated_at: String,
}

/// Publication status for a new post. Synced posts are always published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Published,
}

/// Fields for creating a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPost {
    pub title: String,
    pub html: String,
    pub tags: Vec<String>,
    pub status: PostStatus,
    pub canonical_url: String,
}

/// Fields for editing an existing post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostEdit {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    pub html: String,
    pub tags: Vec<String>,
    pub canonical_url: String,
    pub updated_at: String,
}

/// Content-management API.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// List every post matching an NQL filter, with HTML bodies.
    async fn browse_posts(&self, filter: &str) -> AppResult<Vec<Post>>;

    /// Create a post from HTML.
    async fn add_post(&self, post: &NewPost) -> AppResult<Post>;

    /// Replace a post's content from HTML.
    async fn edit_post(&self, post: &PostEdit) -> AppResult<Post>;

    /// Delete a post by ID.
    async fn delete_post(&self, id: &str) -> AppResult<()>;
}

#[derive(Serialize)]
struct AdminClaims {
    iat: i64,
    exp: i64,
    aud: &'static str,
}

#[derive(Deserialize)]
struct PostsEnvelope {
    #[serde(default)]
    posts: Vec<Post>,
}

/// Sign a short-lived Admin API token from an `id:secret` admin key.
pub fn admin_token(admin_key: &str, issued_at: i64) -> AppResult<String> {
    let (key_id, secret_hex) = admin_key
        .split_once(':')
        .ok_or_else(|| AppError::Config("Ghost admin key must be <id>:<secret>".to_string()))?;
    let secret = hex::decode(secret_hex)
        .map_err(|e| AppError::Config(format!("Ghost admin key secret is not hex: {e}")))?;

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(key_id.to_string());

    let claims = AdminClaims {
        iat: issued_at,
        exp: issued_at + TOKEN_TTL_SECS,
        aud: "/admin/",
    };

    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(&secret))
        .map_err(|e| AppError::Internal(format!("Failed to sign Ghost token: {e}")))
}

/// Ghost Admin API client.
pub struct GhostClient {
    http_client: reqwest::Client,
    admin_base: String,
    admin_key: String,
    api_version: String,
}

impl GhostClient {
    /// Create a client for the site at `site_url`.
    pub fn new(config: &GhostConfig, site_url: &str, admin_key: String) -> AppResult<Self> {
        let admin_key = admin_key.trim().to_string();
        // Fail at startup rather than on the first webhook.
        admin_token(&admin_key, chrono::Utc::now().timestamp())?;

        let site = url::Url::parse(site_url.trim())
            .map_err(|e| AppError::Config(format!("Invalid Ghost URL {site_url}: {e}")))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            admin_base: format!("{}/ghost/api/admin", site.as_str().trim_end_matches('/')),
            admin_key,
            api_version: config.api_version.clone(),
        })
    }

    /// Create a client from the `ghost_url` and `ghost_key` secrets.
    pub async fn from_secrets(config: &GhostConfig, secrets: &dyn SecretStore) -> AppResult<Self> {
        let site_url = secrets.get(names::GHOST_URL).await?;
        let admin_key = secrets.get(names::GHOST_KEY).await?;
        Self::new(config, &site_url, admin_key)
    }

    fn authorization(&self) -> AppResult<String> {
        let token = admin_token(&self.admin_key, chrono::Utc::now().timestamp())?;
        Ok(format!("Ghost {token}"))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> AppResult<reqwest::RequestBuilder> {
        Ok(self
            .http_client
            .request(method, format!("{}{path}", self.admin_base))
            .header("Authorization", self.authorization()?)
            .header("Accept-Version", &self.api_version))
    }

    async fn check(response: reqwest::Response, action: &str) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Ghost {action}: {body}")));
        }
        Err(AppError::ExternalService(format!(
            "Ghost {action} failed: {status} - {body}"
        )))
    }

    fn first_post(envelope: PostsEnvelope, action: &str) -> AppResult<Post> {
        envelope
            .posts
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ExternalService(format!("Ghost {action} returned no post")))
    }
}

#[async_trait]
impl ContentApi for GhostClient {
    async fn browse_posts(&self, filter: &str) -> AppResult<Vec<Post>> {
        let response = self
            .request(reqwest::Method::GET, "/posts/")?
            .query(&[("limit", "all"), ("filter", filter), ("formats", "html")])
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Ghost browse request failed: {e}")))?;
        let response = Self::check(response, "browse").await?;

        let envelope: PostsEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to parse Ghost posts: {e}")))?;
        tracing::debug!(filter, count = envelope.posts.len(), "Browsed Ghost posts");
        Ok(envelope.posts)
    }

    async fn add_post(&self, post: &NewPost) -> AppResult<Post> {
        let response = self
            .request(reqwest::Method::POST, "/posts/")?
            .query(&[("source", "html")])
            .json(&json!({ "posts": [post] }))
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Ghost add request failed: {e}")))?;
        let response = Self::check(response, "add").await?;

        let envelope: PostsEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to parse Ghost post: {e}")))?;
        Self::first_post(envelope, "add")
    }

    async fn edit_post(&self, post: &PostEdit) -> AppResult<Post> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/posts/{}/", post.id))?
            .query(&[("source", "html")])
            .json(&json!({ "posts": [post] }))
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Ghost edit request failed: {e}")))?;
        let response = Self::check(response, "edit").await?;

        let envelope: PostsEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to parse Ghost post: {e}")))?;
        Self::first_post(envelope, "edit")
    }

    async fn delete_post(&self, id: &str) -> AppResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/posts/{id}/"))?
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Ghost delete request failed: {e}")))?;
        Self::check(response, "delete").await?;
        Ok(())
    }
}
