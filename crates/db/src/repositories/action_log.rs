//! Action log repository.

use std::sync::Arc;

use crate::entities::{ActionLog, action_log};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use warden_common::{AppError, AppResult};

/// Action log repository for database operations.
///
/// Entries are only ever inserted; there is no update path.
#[derive(Clone)]
pub struct ActionLogRepository {
    db: Arc<DatabaseConnection>,
}

impl ActionLogRepository {
    /// Create a new action log repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append an entry.
    pub async fn append(&self, model: action_log::ActiveModel) -> AppResult<action_log::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Get the most recent entries for a chat, newest first.
    pub async fn find_by_chat(&self, chat_id: i64, limit: u64) -> AppResult<Vec<action_log::Model>> {
        ActionLog::find()
            .filter(action_log::Column::ChatId.eq(chat_id))
            .order_by_desc(action_log::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }
}
