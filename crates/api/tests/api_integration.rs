//! API integration tests.
//!
//! These drive the routers end to end with in-memory stand-ins for the
//! secret store, Strava, and Ghost.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strava_ghost_api::{RefreshState, WebhookState, refresh_router, webhook_router};
use strava_ghost_common::config::StravaConfig;
use strava_ghost_common::{AppError, AppResult};
use strava_ghost_core::services::secrets::names;
use strava_ghost_core::services::sync::embed_html;
use strava_ghost_core::{
    ActivityApi, ActivityDetails, ActivityFetch, ContentApi, MemorySecretStore, NewPost,
    OAuthCredentials, Post, PostEdit, SecretStore, StravaClient, SyncConfig, SyncService,
    TokenGrant, TokenRefreshService,
};
use tower::ServiceExt;

const VERIFY_TOKEN: &str = "STRAVA";

/// What the fake activity API answers to every fetch.
#[derive(Clone)]
enum FetchBehavior {
    Found,
    Rejected,
    MissingToken,
}

struct FakeStrava {
    behavior: FetchBehavior,
    fetches: Mutex<Vec<String>>,
    grant_refresh_token: Option<String>,
}

impl FakeStrava {
    fn new(behavior: FetchBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            fetches: Mutex::new(Vec::new()),
            grant_refresh_token: Some("R1".to_string()),
        })
    }
}

#[async_trait]
impl ActivityApi for FakeStrava {
    async fn fetch_activity(&self, activity_id: &str) -> AppResult<ActivityFetch> {
        self.fetches.lock().unwrap().push(activity_id.to_string());
        match self.behavior {
            FetchBehavior::Found => Ok(ActivityFetch::Found(ActivityDetails {
                title: "Afternoon Swim".to_string(),
                activity_type: "Swim".to_string(),
                embed_id: activity_id.to_string(),
            })),
            FetchBehavior::Rejected => Ok(ActivityFetch::Rejected(
                "Record Not Found".to_string(),
            )),
            FetchBehavior::MissingToken => Err(AppError::SecretNotFound(
                names::STRAVA_ACCESS_TOKEN.to_string(),
            )),
        }
    }

    async fn exchange_refresh_token(
        &self,
        _credentials: &OAuthCredentials,
    ) -> AppResult<TokenGrant> {
        let refresh_token = self.grant_refresh_token.clone().ok_or_else(|| {
            AppError::ExternalService("Strava OAuth response missing refresh_token".to_string())
        })?;
        Ok(TokenGrant {
            access_token: "A1".to_string(),
            refresh_token,
            expires_at: None,
        })
    }
}

#[derive(Default)]
struct FakeGhost {
    posts: Mutex<Vec<Post>>,
    added: Mutex<Vec<NewPost>>,
    edited: Mutex<Vec<PostEdit>>,
    deleted: Mutex<Vec<String>>,
    fail_delete: bool,
}

#[async_trait]
impl ContentApi for FakeGhost {
    async fn browse_posts(&self, _filter: &str) -> AppResult<Vec<Post>> {
        Ok(self.posts.lock().unwrap().clone())
    }

    async fn add_post(&self, post: &NewPost) -> AppResult<Post> {
        self.added.lock().unwrap().push(post.clone());
        Ok(Post {
            id: "new".to_string(),
            title: Some(post.title.clone()),
            html: Some(post.html.clone()),
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
        })
    }

    async fn edit_post(&self, post: &PostEdit) -> AppResult<Post> {
        self.edited.lock().unwrap().push(post.clone());
        Ok(Post {
            id: post.id.clone(),
            title: Some(post.title.clone()),
            html: Some(post.html.clone()),
            updated_at: "2024-01-02T00:00:00.000Z".to_string(),
        })
    }

    async fn delete_post(&self, id: &str) -> AppResult<()> {
        if self.fail_delete {
            return Err(AppError::ExternalService("Ghost delete failed".to_string()));
        }
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

fn existing_post(id: &str, activity_id: &str) -> Post {
    Post {
        id: id.to_string(),
        title: Some("Old".to_string()),
        html: Some(embed_html(activity_id)),
        updated_at: "2024-02-02T02:02:02.000Z".to_string(),
    }
}

fn webhook_app(strava: Arc<FakeStrava>, ghost: Arc<FakeGhost>, secrets: MemorySecretStore) -> Router {
    let sync = SyncService::new(
        strava,
        ghost,
        SyncConfig {
            create_delay: Duration::ZERO,
            ..SyncConfig::default()
        },
    );
    webhook_router().with_state(WebhookState {
        sync,
        secrets: Arc::new(secrets),
    })
}

fn verify_secrets() -> MemorySecretStore {
    MemorySecretStore::with_secrets([(
        names::STRAVA_VERIFY_TOKEN.to_string(),
        VERIFY_TOKEN.to_string(),
    )])
}

fn default_app() -> Router {
    webhook_app(
        FakeStrava::new(FetchBehavior::Found),
        Arc::default(),
        verify_secrets(),
    )
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn post_event(app: Router, body: impl Into<Body>) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .method("POST")
                .header("Content-Type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn event(object_id: u64, aspect_type: &str) -> String {
    json!({
        "aspect_type": aspect_type,
        "event_time": 1_516_126_040,
        "object_id": object_id,
        "object_type": "activity",
        "owner_id": 134_815,
        "subscription_id": 120_475,
        "updates": {}
    })
    .to_string()
}

// ==================== Subscription verification ====================

#[tokio::test]
async fn test_verification_echoes_challenge() {
    let (status, body) = get(
        default_app(),
        "/?hub.mode=subscribe&hub.verify_token=STRAVA&hub.challenge=15f7d1a91c1f40f8a748fd134752feb3",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json, json!({ "hub.challenge": "15f7d1a91c1f40f8a748fd134752feb3" }));
}

#[tokio::test]
async fn test_verification_rejects_wrong_token() {
    for challenge in ["abc", "", "STRAVA"] {
        let uri = format!("/?hub.mode=subscribe&hub.verify_token=nope&hub.challenge={challenge}");
        let (status, body) = get(default_app(), &uri).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Failed verification");
    }
}

#[tokio::test]
async fn test_verification_requires_subscribe_mode() {
    let (status, _) = get(
        default_app(),
        "/?hub.mode=unsubscribe&hub.verify_token=STRAVA&hub.challenge=abc",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(default_app(), "/").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_verification_without_stored_token_is_server_error() {
    let app = webhook_app(
        FakeStrava::new(FetchBehavior::Found),
        Arc::default(),
        MemorySecretStore::new(),
    );
    let (status, _) = get(
        app,
        "/?hub.mode=subscribe&hub.verify_token=STRAVA&hub.challenge=abc",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// ==================== Event delivery ====================

#[tokio::test]
async fn test_missing_fields_is_bad_request() {
    let expected = json!({
        "message": "This endpoint expects aspect_type and object_id in the request."
    });

    for body in [
        json!({ "object_id": 1 }).to_string(),
        json!({ "aspect_type": "create" }).to_string(),
        json!({}).to_string(),
        "not json".to_string(),
        String::new(),
    ] {
        let (status, response) = post_event(default_app(), body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(serde_json::from_str::<Value>(&response).unwrap(), expected);
    }
}

#[tokio::test]
async fn test_unread_fields_of_any_type_are_ignored() {
    let ghost = Arc::new(FakeGhost::default());
    ghost.posts.lock().unwrap().push(existing_post("p-9", "9"));
    let app = webhook_app(FakeStrava::new(FetchBehavior::Found), ghost.clone(), verify_secrets());

    let body = json!({
        "aspect_type": "update",
        "event_time": "1516126040",
        "object_id": 9,
        "object_type": "activity",
        "owner_id": 134_815.5,
        "subscription_id": null,
        "updates": "title"
    });
    let (status, response) = post_event(app, body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, "Post created or updated successfully.");
    assert_eq!(ghost.edited.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_aspect_type_is_bad_request() {
    let strava = FakeStrava::new(FetchBehavior::Found);
    let app = webhook_app(strava.clone(), Arc::default(), verify_secrets());

    let (status, _) = post_event(app, event(5, "archive")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(strava.fetches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_event_publishes_post() {
    let ghost = Arc::new(FakeGhost::default());
    let app = webhook_app(FakeStrava::new(FetchBehavior::Found), ghost.clone(), verify_secrets());

    let (status, body) = post_event(app, event(1_360_128_428, "create")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Post created or updated successfully.");

    let added = ghost.added.lock().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].title, "Afternoon Swim");
    assert_eq!(added[0].tags, vec!["Swim".to_string(), "Strava".to_string()]);
    assert!(added[0].html.contains("data-embed-id=\"1360128428\""));
}

#[tokio::test]
async fn test_update_event_edits_existing_post() {
    let ghost = Arc::new(FakeGhost::default());
    ghost.posts.lock().unwrap().push(existing_post("p-1", "88"));
    let app = webhook_app(FakeStrava::new(FetchBehavior::Found), ghost.clone(), verify_secrets());

    let (status, _) = post_event(app, event(88, "update")).await;
    assert_eq!(status, StatusCode::OK);

    let edited = ghost.edited.lock().unwrap();
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0].id, "p-1");
    assert_eq!(edited[0].updated_at, "2024-02-02T02:02:02.000Z");
    assert!(ghost.added.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unfetchable_activity_is_not_found() {
    let ghost = Arc::new(FakeGhost::default());
    let app = webhook_app(
        FakeStrava::new(FetchBehavior::Rejected),
        ghost.clone(),
        verify_secrets(),
    );

    let (status, body) = post_event(app, event(3, "update")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Activity not found or is not accessible.");
    assert!(ghost.added.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_without_match_succeeds() {
    let ghost = Arc::new(FakeGhost::default());
    ghost.posts.lock().unwrap().push(existing_post("p-1", "1"));
    let strava = FakeStrava::new(FetchBehavior::Found);
    let app = webhook_app(strava.clone(), ghost.clone(), verify_secrets());

    let (status, body) = post_event(app, event(2, "delete")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Delete event processed successfully.");
    assert!(ghost.deleted.lock().unwrap().is_empty());
    assert!(strava.fetches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_removes_matching_post() {
    let ghost = Arc::new(FakeGhost::default());
    ghost.posts.lock().unwrap().push(existing_post("p-7", "7"));
    let app = webhook_app(FakeStrava::new(FetchBehavior::Found), ghost.clone(), verify_secrets());

    let (status, _) = post_event(app, event(7, "delete")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*ghost.deleted.lock().unwrap(), vec!["p-7".to_string()]);
}

#[tokio::test]
async fn test_failed_delete_still_succeeds() {
    let ghost = Arc::new(FakeGhost {
        fail_delete: true,
        ..FakeGhost::default()
    });
    ghost.posts.lock().unwrap().push(existing_post("p-7", "7"));
    let app = webhook_app(FakeStrava::new(FetchBehavior::Found), ghost, verify_secrets());

    let (status, _) = post_event(app, event(7, "delete")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unhandled_error_is_generic_server_error() {
    let app = webhook_app(
        FakeStrava::new(FetchBehavior::MissingToken),
        Arc::default(),
        verify_secrets(),
    );

    let (status, body) = post_event(app, event(4, "update")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error");
}

#[tokio::test]
async fn test_missing_access_token_is_server_error_without_retries() {
    let secrets: Arc<MemorySecretStore> = Arc::new(verify_secrets());
    let strava = StravaClient::new(&StravaConfig::default(), secrets.clone()).unwrap();
    let ghost = Arc::new(FakeGhost::default());
    let sync = SyncService::new(
        Arc::new(strava),
        ghost.clone(),
        SyncConfig {
            create_delay: Duration::ZERO,
            ..SyncConfig::default()
        },
    );
    let app = webhook_router().with_state(WebhookState { sync, secrets });

    let started = std::time::Instant::now();
    let (status, body) = post_event(app, event(4, "update")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(ghost.edited.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_athlete_event_is_ignored() {
    let strava = FakeStrava::new(FetchBehavior::Found);
    let app = webhook_app(strava.clone(), Arc::default(), verify_secrets());

    let body = json!({
        "aspect_type": "update",
        "object_id": 134_815,
        "object_type": "athlete",
        "updates": { "authorized": "false" }
    });
    let (status, _) = post_event(app, body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(strava.fetches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get(default_app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

// ==================== Token refresh ====================

fn refresh_secrets() -> MemorySecretStore {
    MemorySecretStore::with_secrets([
        (names::STRAVA_CLIENT_ID.to_string(), "1234".to_string()),
        (names::STRAVA_CLIENT_SECRET.to_string(), "secret".to_string()),
        (names::STRAVA_REFRESH_TOKEN.to_string(), "R0".to_string()),
    ])
}

fn refresh_app(strava: Arc<FakeStrava>, secrets: MemorySecretStore) -> Router {
    refresh_router().with_state(RefreshState {
        refresher: TokenRefreshService::new(Arc::new(secrets), strava, false),
    })
}

#[tokio::test]
async fn test_refresh_trigger_rotates_tokens() {
    let secrets = refresh_secrets();
    let app = refresh_app(FakeStrava::new(FetchBehavior::Found), secrets.clone());

    let (status, body) = get(app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Strava access token refreshed successfully");

    assert_eq!(
        secrets.write_history().await,
        vec![
            names::STRAVA_ACCESS_TOKEN.to_string(),
            names::STRAVA_REFRESH_TOKEN.to_string()
        ]
    );
    assert_eq!(secrets.get(names::STRAVA_REFRESH_TOKEN).await.unwrap(), "R1");
}

#[tokio::test]
async fn test_refresh_trigger_reports_failure() {
    let secrets = refresh_secrets();
    let strava = Arc::new(FakeStrava {
        behavior: FetchBehavior::Found,
        fetches: Mutex::new(Vec::new()),
        grant_refresh_token: None,
    });
    let app = refresh_app(strava, secrets.clone());

    let (status, body) = get(app, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error refreshing Strava access token");
    assert!(secrets.write_history().await.is_empty());
}
