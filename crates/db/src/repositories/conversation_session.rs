//! Conversation session repository.

use std::sync::Arc;

use crate::entities::{ConversationSession, conversation_session};
use chrono::{DateTime, FixedOffset};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
    sea_query::OnConflict,
};
use warden_common::{AppError, AppResult};

/// Conversation session repository for database operations.
#[derive(Clone)]
pub struct ConversationSessionRepository {
    db: Arc<DatabaseConnection>,
}

impl ConversationSessionRepository {
    /// Create a new conversation session repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the open session of an admin in a chat.
    pub async fn find(
        &self,
        chat_id: i64,
        admin_id: i64,
    ) -> AppResult<Option<conversation_session::Model>> {
        ConversationSession::find_by_id((chat_id, admin_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Create or replace the session for its (chat, admin) pair.
    pub async fn upsert(&self, model: conversation_session::Model) -> AppResult<()> {
        let active = conversation_session::ActiveModel {
            chat_id: Set(model.chat_id),
            admin_id: Set(model.admin_id),
            state: Set(model.state),
            collected_inputs: Set(model.collected_inputs),
            expires_at: Set(model.expires_at),
            created_at: Set(model.created_at),
        };

        ConversationSession::insert(active)
            .on_conflict(
                OnConflict::columns([
                    conversation_session::Column::ChatId,
                    conversation_session::Column::AdminId,
                ])
                .update_columns([
                    conversation_session::Column::State,
                    conversation_session::Column::CollectedInputs,
                    conversation_session::Column::ExpiresAt,
                    conversation_session::Column::CreatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(())
    }

    /// Delete the session of an admin in a chat.
    pub async fn delete(&self, chat_id: i64, admin_id: i64) -> AppResult<()> {
        ConversationSession::delete_many()
            .filter(conversation_session::Column::ChatId.eq(chat_id))
            .filter(conversation_session::Column::AdminId.eq(admin_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(())
    }

    /// Get keys of sessions whose deadline is at or before `now`.
    pub async fn find_expired_keys(&self, now: DateTime<FixedOffset>) -> AppResult<Vec<(i64, i64)>> {
        ConversationSession::find()
            .select_only()
            .column(conversation_session::Column::ChatId)
            .column(conversation_session::Column::AdminId)
            .filter(conversation_session::Column::ExpiresAt.lte(now))
            .into_tuple::<(i64, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }
}
