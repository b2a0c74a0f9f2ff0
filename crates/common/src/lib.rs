//! Common utilities and shared types for warden.
//!
//! This crate provides foundational components used across all warden crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//! - **Retry**: Exponential backoff policy via [`RetryConfig`]
//!
//! # Example
//!
//! ```no_run
//! use warden_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("threshold {} / log id {}", config.moderation.warn_threshold, id_gen.generate());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod retry;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use retry::{DeadLetterEntry, RetryConfig};
