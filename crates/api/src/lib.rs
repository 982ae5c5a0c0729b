//! HTTP layer for strava-ghost.
//!
//! Two independent routers, one per deployment:
//!
//! - **Webhook**: subscription verification and activity event delivery
//! - **Refresh**: a trigger that rotates the Strava OAuth tokens
//!
//! Both expose `GET /health` for container liveness probes.

pub mod endpoints;
pub mod response;
pub mod state;

pub use endpoints::{refresh_router, webhook_router};
pub use state::{RefreshState, WebhookState};
