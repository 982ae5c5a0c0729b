//! Common utilities and shared types for strava-ghost.
//!
//! This crate provides foundational components used across all strava-ghost crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Retry**: Bounded exponential backoff via [`RetryConfig`]
//!
//! # Example
//!
//! ```no_run
//! use strava_ghost_common::{AppResult, Config, RetryConfig};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let retry = RetryConfig::from(&config.sync);
//!     println!("Worst case backoff: {:?}", retry.worst_case_delay());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod retry;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use retry::RetryConfig;
