//! Core services for strava-ghost: secret storage, the Strava and Ghost
//! clients, activity sync, and token refresh.

pub mod services;

pub use services::*;
