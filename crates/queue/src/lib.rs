//! Background processing for the moderation bot.
//!
//! This crate runs everything that happens off the request path:
//!
//! - **Dispatcher**: per-chat ordered delivery of inbound events
//! - **Scheduler**: periodic sweeps (expired mutes, expired sessions, compaction)
//! - **Executor**: the scheduled jobs wired to the moderation services

pub mod dispatcher;
pub mod executor;
pub mod scheduler;

pub use dispatcher::{ChatDispatcher, EventHandler};
pub use executor::ModerationJobs;
pub use scheduler::{JobExecutor, ScheduledJob, SchedulerConfig, run_scheduler};
