//! Response bodies shared by the handlers.
//!
//! Webhook callers only look at the status code, so most bodies are short
//! plain-text sentences.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// `{"message": ...}` body used for client errors.
#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

/// Plain-text response.
pub fn text(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}

/// JSON `{"message": ...}` response.
pub fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(MessageBody {
            message: message.into(),
        }),
    )
        .into_response()
}

/// Generic 500 that reveals nothing about the failure.
pub fn internal_error() -> Response {
    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}
