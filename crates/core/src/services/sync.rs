//! Mirrors Strava activity lifecycle events into Ghost posts.
//!
//! Posts are correlated with activities by the embed marker in their HTML;
//! there is no foreign key. Every lookup browses all posts carrying the sync
//! tag and scans them, which is fine at personal-blog scale.
//!
//! Nothing here serialises deliveries for the same activity: two concurrent
//! deliveries can both miss the existing post and both create one.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use strava_ghost_common::config::{GhostConfig, SyncSettings};
use strava_ghost_common::{AppError, AppResult, RetryConfig};

use super::ghost::{ContentApi, NewPost, Post, PostEdit, PostStatus};
use super::strava::{ActivityApi, ActivityDetails, ActivityFetch};

/// Script that renders the embed placeholder on the blog.
pub const EMBED_SCRIPT_URL: &str = "https://strava-embeds.com/embed.js";

/// Message returned when a delivery lacks the fields we route on.
pub const MISSING_FIELDS_MESSAGE: &str =
    "This endpoint expects aspect_type and object_id in the request.";

/// Kind of lifecycle change reported by Strava.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectType {
    Create,
    Update,
    Delete,
}

impl AspectType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Raw webhook body. Only the routing fields are read; everything else
/// Strava sends is ignored whatever its type.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object_id: Option<Value>,
    #[serde(default)]
    pub aspect_type: Option<Value>,
    #[serde(default)]
    pub object_type: Option<Value>,
}

/// A validated activity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    pub object_id: String,
    pub aspect_type: AspectType,
    pub object_type: Option<String>,
}

impl ActivityEvent {
    /// Validate a webhook body.
    ///
    /// Missing, null, zero, or empty `object_id` and `aspect_type` values are
    /// rejected, as is any aspect type other than create, update, or delete.
    pub fn from_payload(payload: WebhookPayload) -> AppResult<Self> {
        let object_id = payload.object_id.as_ref().and_then(normalize_id);
        let aspect = payload
            .aspect_type
            .as_ref()
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty());

        let (Some(object_id), Some(aspect)) = (object_id, aspect) else {
            return Err(AppError::BadRequest(MISSING_FIELDS_MESSAGE.to_string()));
        };
        let aspect_type = AspectType::parse(aspect)
            .ok_or_else(|| AppError::BadRequest(MISSING_FIELDS_MESSAGE.to_string()))?;

        Ok(Self {
            object_id,
            aspect_type,
            object_type: payload
                .object_type
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Whether the event concerns an athlete rather than an activity.
    #[must_use]
    pub fn is_athlete_event(&self) -> bool {
        self.object_type.as_deref() == Some("athlete")
    }
}

fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Attribute that ties a post to an activity.
#[must_use]
pub fn embed_marker(activity_id: &str) -> String {
    format!("data-embed-id=\"{activity_id}\"")
}

/// Post body for an activity: the embed placeholder plus the embed script.
#[must_use]
pub fn embed_html(activity_id: &str) -> String {
    format!(
        "\n<!--kg-card-begin: html-->\n\
         <div class=\"strava-embed-placeholder\" data-embed-type=\"activity\" {} data-style=\"standard\"></div>\n\
         <script src=\"{EMBED_SCRIPT_URL}\"></script>\n\
         <!--kg-card-end: html-->",
        embed_marker(activity_id)
    )
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Wait before fetching a newly created activity.
    pub create_delay: Duration,
    /// Fetch retry policy for transient failures.
    pub retry: RetryConfig,
    /// Tag carried by every synced post.
    pub tag: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            create_delay: Duration::from_secs(15),
            retry: RetryConfig::default(),
            tag: "Strava".to_string(),
        }
    }
}

impl SyncConfig {
    /// Build from the `sync` and `ghost` configuration sections.
    #[must_use]
    pub fn from_settings(sync: &SyncSettings, ghost: &GhostConfig) -> Self {
        Self {
            create_delay: sync.create_delay(),
            retry: RetryConfig::from(sync),
            tag: ghost.tag.clone(),
        }
    }
}

/// Result of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created { post_id: String },
    Updated { post_id: String },
}

/// Result of a delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { post_id: String },
    NotFound,
}

/// What handling a webhook event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// A post was created or updated.
    Synced(SyncOutcome),
    /// A delete was processed; `deleted` is false when nothing matched or
    /// the delete failed.
    DeleteProcessed { deleted: bool },
    /// The activity could not be fetched.
    ActivityUnavailable,
    /// The event does not concern an activity.
    Ignored,
}

/// Sync orchestrator.
#[derive(Clone)]
pub struct SyncService {
    activities: Arc<dyn ActivityApi>,
    content: Arc<dyn ContentApi>,
    config: SyncConfig,
}

impl SyncService {
    /// Create a new sync service.
    #[must_use]
    pub fn new(
        activities: Arc<dyn ActivityApi>,
        content: Arc<dyn ContentApi>,
        config: SyncConfig,
    ) -> Self {
        Self {
            activities,
            content,
            config,
        }
    }

    fn tag_filter(&self) -> String {
        format!("tag:{}", self.config.tag)
    }

    /// Handle one validated webhook event end to end.
    pub async fn handle_event(&self, event: &ActivityEvent) -> AppResult<EventOutcome> {
        if event.is_athlete_event() {
            tracing::info!(object_id = %event.object_id, "Ignoring athlete event");
            return Ok(EventOutcome::Ignored);
        }

        let activity_id = event.object_id.as_str();

        if event.aspect_type == AspectType::Delete {
            tracing::info!(activity_id, "Received delete event");
            let deleted = match self.delete_post_for_activity(activity_id).await {
                Ok(DeleteOutcome::Deleted { .. }) => true,
                Ok(DeleteOutcome::NotFound) => false,
                Err(e) => {
                    tracing::error!(activity_id, error = %e, "Failed to delete post");
                    false
                }
            };
            return Ok(EventOutcome::DeleteProcessed { deleted });
        }

        tracing::info!(activity_id, aspect_type = event.aspect_type.as_str(), "Received event");

        if event.aspect_type == AspectType::Create && !self.config.create_delay.is_zero() {
            tracing::info!(
                activity_id,
                delay_secs = self.config.create_delay.as_secs(),
                "Waiting before fetching new activity"
            );
            tokio::time::sleep(self.config.create_delay).await;
        }

        let Some(details) = self.fetch_activity_details(activity_id).await? else {
            tracing::warn!(activity_id, "Activity not found or not accessible, skipping");
            return Ok(EventOutcome::ActivityUnavailable);
        };

        let outcome = self.upsert(&details).await?;
        Ok(EventOutcome::Synced(outcome))
    }

    /// Fetch activity details, retrying transient failures with backoff.
    ///
    /// Returns `None` when the API rejects the request or every attempt
    /// failed. Non-transient errors (e.g. a missing access token) propagate.
    pub async fn fetch_activity_details(
        &self,
        activity_id: &str,
    ) -> AppResult<Option<ActivityDetails>> {
        let retry = self.config.retry;
        let mut attempt = 0;

        loop {
            match self.activities.fetch_activity(activity_id).await {
                Ok(ActivityFetch::Found(details)) => return Ok(Some(details)),
                Ok(ActivityFetch::Rejected(reason)) => {
                    tracing::warn!(activity_id, reason = %reason, "Strava rejected activity fetch");
                    return Ok(None);
                }
                Err(e) if e.is_transient() => {
                    if !retry.should_retry(attempt) {
                        tracing::error!(
                            activity_id,
                            attempts = attempt + 1,
                            error = %e,
                            "Maximum retry attempts reached"
                        );
                        return Ok(None);
                    }

                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        activity_id,
                        attempt = attempt + 1,
                        max_attempts = retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Activity fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Find the first tagged post whose HTML carries this activity's marker.
    pub async fn find_post_by_activity_id(&self, activity_id: &str) -> AppResult<Option<Post>> {
        let marker = embed_marker(activity_id);
        let posts = self.content.browse_posts(&self.tag_filter()).await?;
        let found = posts
            .into_iter()
            .find(|post| post.html.as_deref().is_some_and(|html| html.contains(&marker)));

        tracing::debug!(activity_id, found = found.is_some(), "Searched posts for activity");
        Ok(found)
    }

    /// Update the matching post, or create one when none exists.
    pub async fn upsert(&self, details: &ActivityDetails) -> AppResult<SyncOutcome> {
        match self.find_post_by_activity_id(&details.embed_id).await? {
            Some(post) => self.update_post(&post, details).await,
            None => self.create_post(details).await,
        }
    }

    fn tags(&self, details: &ActivityDetails) -> Vec<String> {
        vec![details.activity_type.clone(), self.config.tag.clone()]
    }

    /// Publish a new post for an activity.
    pub async fn create_post(&self, details: &ActivityDetails) -> AppResult<SyncOutcome> {
        let post = NewPost {
            title: details.title.clone(),
            html: embed_html(&details.embed_id),
            tags: self.tags(details),
            status: PostStatus::Published,
            canonical_url: details.canonical_url(),
        };

        let created = self.content.add_post(&post).await?;
        tracing::info!(
            activity_id = %details.embed_id,
            post_id = %created.id,
            "Created post for activity"
        );
        Ok(SyncOutcome::Created {
            post_id: created.id,
        })
    }

    /// Rewrite an existing post, using its `updated_at` as the collision token.
    pub async fn update_post(
        &self,
        post: &Post,
        details: &ActivityDetails,
    ) -> AppResult<SyncOutcome> {
        let edit = PostEdit {
            id: post.id.clone(),
            title: details.title.clone(),
            html: embed_html(&details.embed_id),
            tags: self.tags(details),
            canonical_url: details.canonical_url(),
            updated_at: post.updated_at.clone(),
        };

        let updated = self.content.edit_post(&edit).await?;
        tracing::info!(
            activity_id = %details.embed_id,
            post_id = %updated.id,
            "Updated post for activity"
        );
        Ok(SyncOutcome::Updated {
            post_id: updated.id,
        })
    }

    /// Delete the first tagged post carrying this activity's marker.
    ///
    /// Only one post is removed even if duplicates exist.
    pub async fn delete_post_for_activity(&self, activity_id: &str) -> AppResult<DeleteOutcome> {
        let Some(post) = self.find_post_by_activity_id(activity_id).await? else {
            tracing::info!(activity_id, "No post found for activity to delete");
            return Ok(DeleteOutcome::NotFound);
        };

        self.content.delete_post(&post.id).await?;
        tracing::info!(activity_id, post_id = %post.id, "Deleted post for activity");
        Ok(DeleteOutcome::Deleted { post_id: post.id })
    }
}
