//! Append-only audit trail of moderation actions.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use warden_common::{AppError, AppResult, IdGenerator};
use warden_db::{entities::action_log, repositories::ActionLogRepository};

use crate::services::infraction_store::{ChatId, UserId};

/// Actor id recorded for actions taken by the process itself.
pub const SYSTEM_ACTOR: UserId = 0;

/// Kind of a logged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Warn,
    Unwarn,
    Mute,
    Unmute,
    Ban,
    Unban,
    Kick,
    Reset,
}

impl ActionKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Unwarn => "unwarn",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Kick => "kick",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warn" => Ok(Self::Warn),
            "unwarn" => Ok(Self::Unwarn),
            "mute" => Ok(Self::Mute),
            "unmute" => Ok(Self::Unmute),
            "ban" => Ok(Self::Ban),
            "unban" => Ok(Self::Unban),
            "kick" => Ok(Self::Kick),
            "reset" => Ok(Self::Reset),
            other => Err(AppError::Internal(format!("unknown action kind: {other}"))),
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub at: DateTime<Utc>,
    pub actor_id: UserId,
    pub kind: ActionKind,
    pub target_id: UserId,
    pub chat_id: Option<ChatId>,
    pub detail: Option<String>,
}

impl TryFrom<action_log::Model> for ActionLogEntry {
    type Error = AppError;

    fn try_from(model: action_log::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            at: model.created_at.with_timezone(&Utc),
            actor_id: model.actor_id,
            kind: model.action.parse()?,
            target_id: model.target_id,
            chat_id: model.chat_id,
            detail: model.detail,
        })
    }
}

/// Audit log sink.
#[async_trait]
pub trait ActionLog: Send + Sync {
    /// Append an entry. Entries are never updated afterwards.
    async fn append(&self, entry: ActionLogEntry) -> AppResult<()>;

    /// Most recent entries of a chat, newest first.
    async fn recent(&self, chat_id: ChatId, limit: u64) -> AppResult<Vec<ActionLogEntry>>;
}

/// [`ActionLog`] persisted through the action log table.
#[derive(Clone)]
pub struct PersistentActionLog {
    repo: ActionLogRepository,
    id_gen: IdGenerator,
}

impl PersistentActionLog {
    #[must_use]
    pub const fn new(repo: ActionLogRepository) -> Self {
        Self {
            repo,
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl ActionLog for PersistentActionLog {
    async fn append(&self, entry: ActionLogEntry) -> AppResult<()> {
        let model = action_log::ActiveModel {
            id: Set(self.id_gen.generate()),
            actor_id: Set(entry.actor_id),
            action: Set(entry.kind.as_str().to_string()),
            target_id: Set(entry.target_id),
            chat_id: Set(entry.chat_id),
            detail: Set(entry.detail),
            created_at: Set(entry.at.fixed_offset()),
        };
        self.repo.append(model).await?;
        Ok(())
    }

    async fn recent(&self, chat_id: ChatId, limit: u64) -> AppResult<Vec<ActionLogEntry>> {
        self.repo
            .find_by_chat(chat_id, limit)
            .await?
            .into_iter()
            .map(ActionLogEntry::try_from)
            .collect()
    }
}
