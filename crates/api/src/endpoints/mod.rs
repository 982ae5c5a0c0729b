//! API endpoints.

mod health;
mod refresh;
mod webhook;

use axum::{Router, routing::get};

use crate::state::{RefreshState, WebhookState};

/// Create the webhook router.
pub fn webhook_router() -> Router<WebhookState> {
    Router::new()
        .route(
            "/",
            get(webhook::verify_subscription).post(webhook::receive_event),
        )
        .route("/health", get(health::health))
}

/// Create the token refresh router.
pub fn refresh_router() -> Router<RefreshState> {
    Router::new()
        .route("/", get(refresh::refresh_tokens))
        .route("/health", get(health::health))
}
