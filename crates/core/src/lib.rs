//! Core moderation logic for warden.
//!
//! Infraction tracking, escalation, mute expiry, the admin panel
//! conversation and the controller that ties them to inbound events.

pub mod services;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use services::*;
