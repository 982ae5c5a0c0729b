//! Business logic services.

#![allow(missing_docs)]

pub mod ghost;
pub mod secrets;
pub mod strava;
pub mod sync;
pub mod token_refresh;

pub use ghost::{ContentApi, GhostClient, NewPost, Post, PostEdit, PostStatus};
pub use secrets::{
    GoogleSecretStore, MemorySecretStore, SecretStore, SecretVersion, SharedSecretStore,
    VersionState,
};
pub use strava::{ActivityApi, ActivityDetails, ActivityFetch, OAuthCredentials, StravaClient, TokenGrant};
pub use sync::{
    ActivityEvent, AspectType, DeleteOutcome, EventOutcome, SyncConfig, SyncOutcome, SyncService,
    WebhookPayload,
};
pub use token_refresh::{TokenRefreshService, run_refresh_scheduler};
