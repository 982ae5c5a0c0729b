//! Strava webhook endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use strava_ghost_common::AppResult;
use strava_ghost_core::services::secrets::names;
use strava_ghost_core::services::sync::MISSING_FIELDS_MESSAGE;
use strava_ghost_core::{ActivityEvent, EventOutcome, WebhookPayload};

use crate::response::{internal_error, message, text};
use crate::state::WebhookState;

/// Subscription handshake parameters.
#[derive(Debug, Deserialize)]
pub struct VerificationQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChallengeResponse {
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Answer the subscription handshake.
///
/// The challenge is echoed only when the mode is `subscribe` and the token
/// matches the stored verify token.
pub async fn verify_subscription(
    State(state): State<WebhookState>,
    Query(query): Query<VerificationQuery>,
) -> AppResult<Response> {
    let expected = state.secrets.get(names::STRAVA_VERIFY_TOKEN).await?;

    let subscribe = query.mode.as_deref() == Some("subscribe");
    let token_matches = query.verify_token.as_deref() == Some(expected.as_str());

    if subscribe && token_matches {
        tracing::info!("Webhook subscription verified");
        return Ok(Json(ChallengeResponse {
            challenge: query.challenge,
        })
        .into_response());
    }

    tracing::warn!(mode = ?query.mode, token_matches, "Webhook verification failed");
    Ok(text(StatusCode::FORBIDDEN, "Failed verification"))
}

/// Receive an activity event.
///
/// The body is parsed leniently: anything that is not a JSON object with the
/// routing fields gets the same 400.
pub async fn receive_event(State(state): State<WebhookState>, body: Bytes) -> Response {
    let payload: WebhookPayload = serde_json::from_slice(&body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Unparseable webhook body");
        WebhookPayload::default()
    });

    let event = match ActivityEvent::from_payload(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook delivery");
            return message(StatusCode::BAD_REQUEST, MISSING_FIELDS_MESSAGE);
        }
    };

    let span = tracing::info_span!(
        "webhook_delivery",
        delivery_id = %Uuid::new_v4(),
        object_id = %event.object_id,
        aspect_type = event.aspect_type.as_str(),
    );

    async move {
        match state.sync.handle_event(&event).await {
            Ok(outcome) => outcome_response(&outcome),
            Err(e) => {
                tracing::error!(error = %e, "Failed to process webhook event");
                internal_error()
            }
        }
    }
    .instrument(span)
    .await
}

fn outcome_response(outcome: &EventOutcome) -> Response {
    match outcome {
        EventOutcome::Synced(_) => text(StatusCode::OK, "Post created or updated successfully."),
        EventOutcome::DeleteProcessed { .. } => {
            text(StatusCode::OK, "Delete event processed successfully.")
        }
        EventOutcome::ActivityUnavailable => text(
            StatusCode::NOT_FOUND,
            "Activity not found or is not accessible.",
        ),
        EventOutcome::Ignored => text(StatusCode::OK, "Event ignored."),
    }
}
