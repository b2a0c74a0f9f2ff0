//! Boundary contracts with the transport.
//!
//! The core never talks to a chat platform directly. Role checks, real
//! bans and mutes, and message delivery go through these traits; the
//! transport crate implements them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_common::AppResult;

use crate::services::infraction_store::{ChatId, InfractionRecord, UserId};
use crate::services::messages::OutboundMessage;

/// Chat role of an actor, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
    Owner,
}

/// Read-only role check.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `actor_id` holds at least `required` in `chat_id`.
    async fn is_authorized(
        &self,
        chat_id: ChatId,
        actor_id: UserId,
        required: Role,
    ) -> AppResult<bool>;
}

/// A transport-level moderation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnforcementAction {
    Ban,
    Unban,
    Mute { until: DateTime<Utc> },
    Unmute,
    Kick,
}

impl EnforcementAction {
    /// Whether the action still reflects local state.
    ///
    /// Used before retrying: once a later mutation has superseded the
    /// action (e.g. the user was unbanned meanwhile), the retry is dropped.
    #[must_use]
    pub fn is_current(&self, record: &InfractionRecord) -> bool {
        match self {
            Self::Ban => record.is_banned(),
            Self::Unban => !record.is_banned(),
            Self::Mute { until } => !record.is_banned() && record.mute_until == Some(*until),
            Self::Unmute => !record.is_banned() && record.mute_until.is_none(),
            Self::Kick => !record.is_banned(),
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Mute { .. } => "mute",
            Self::Unmute => "unmute",
            Self::Kick => "kick",
        }
    }
}

/// Applies moderation actions on the platform.
///
/// Implementations must be idempotent: enforcing an action that is already
/// in effect succeeds without change.
#[async_trait]
pub trait Enforcer: Send + Sync {
    async fn enforce(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        action: &EnforcementAction,
    ) -> AppResult<()>;
}

/// Delivers outbound messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &OutboundMessage) -> AppResult<()>;
}
