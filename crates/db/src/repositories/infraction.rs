//! Infraction repository.

use std::sync::Arc;

use crate::entities::{Infraction, infraction};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::OnConflict,
};
use warden_common::{AppError, AppResult};

/// Infraction repository for database operations.
#[derive(Clone)]
pub struct InfractionRepository {
    db: Arc<DatabaseConnection>,
}

impl InfractionRepository {
    /// Create a new infraction repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the record for a (chat, user) pair.
    pub async fn find(&self, chat_id: i64, user_id: i64) -> AppResult<Option<infraction::Model>> {
        Infraction::find_by_id((chat_id, user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Insert or overwrite the record for its (chat, user) pair.
    ///
    /// Returns once the row is committed.
    pub async fn upsert(&self, model: infraction::Model) -> AppResult<()> {
        let active = infraction::ActiveModel {
            chat_id: Set(model.chat_id),
            user_id: Set(model.user_id),
            warning_count: Set(model.warning_count),
            mute_until: Set(model.mute_until),
            ban_reason: Set(model.ban_reason),
            updated_at: Set(model.updated_at),
        };

        Infraction::insert(active)
            .on_conflict(
                OnConflict::columns([infraction::Column::ChatId, infraction::Column::UserId])
                    .update_columns([
                        infraction::Column::WarningCount,
                        infraction::Column::MuteUntil,
                        infraction::Column::BanReason,
                        infraction::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(())
    }

    /// Delete the record for a (chat, user) pair.
    pub async fn delete(&self, chat_id: i64, user_id: i64) -> AppResult<bool> {
        let result = Infraction::delete_many()
            .filter(infraction::Column::ChatId.eq(chat_id))
            .filter(infraction::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Get muted, non-banned users of a chat, soonest expiry first.
    pub async fn find_muted(&self, chat_id: i64) -> AppResult<Vec<infraction::Model>> {
        Infraction::find()
            .filter(infraction::Column::ChatId.eq(chat_id))
            .filter(infraction::Column::MuteUntil.is_not_null())
            .filter(infraction::Column::BanReason.is_null())
            .order_by_asc(infraction::Column::MuteUntil)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Get chats that have at least one muted user.
    pub async fn find_chats_with_mutes(&self) -> AppResult<Vec<i64>> {
        Infraction::find()
            .select_only()
            .column(infraction::Column::ChatId)
            .filter(infraction::Column::MuteUntil.is_not_null())
            .distinct()
            .into_tuple::<i64>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Get keys of records that carry no warnings, mute or ban.
    pub async fn find_empty_keys(&self) -> AppResult<Vec<(i64, i64)>> {
        Infraction::find()
            .select_only()
            .column(infraction::Column::ChatId)
            .column(infraction::Column::UserId)
            .filter(infraction::Column::WarningCount.eq(0))
            .filter(infraction::Column::MuteUntil.is_null())
            .filter(infraction::Column::BanReason.is_null())
            .into_tuple::<(i64, i64)>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Delete the record for a pair only if it is still empty.
    pub async fn delete_if_empty(&self, chat_id: i64, user_id: i64) -> AppResult<bool> {
        let result = Infraction::delete_many()
            .filter(infraction::Column::ChatId.eq(chat_id))
            .filter(infraction::Column::UserId.eq(user_id))
            .filter(infraction::Column::WarningCount.eq(0))
            .filter(infraction::Column::MuteUntil.is_null())
            .filter(infraction::Column::BanReason.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_record(chat_id: i64, user_id: i64, warnings: i32) -> infraction::Model {
        infraction::Model {
            chat_id,
            user_id,
            warning_count: warnings,
            mute_until: None,
            ban_reason: None,
            updated_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn test_find_returns_record() {
        let record = create_test_record(-100, 7, 2);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[record.clone()]])
                .into_connection(),
        );

        let repo = InfractionRepository::new(db);
        let found = repo.find(-100, 7).await.unwrap().unwrap();

        assert_eq!(found.warning_count, 2);
        assert_eq!(found.user_id, 7);
    }

    #[tokio::test]
    async fn test_find_missing_returns_none() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<infraction::Model>::new()])
                .into_connection(),
        );

        let repo = InfractionRepository::new(db);
        assert!(repo.find(-100, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_commits() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = InfractionRepository::new(db);
        assert!(repo.upsert(create_test_record(-100, 7, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_find_muted_returns_rows() {
        let mut muted = create_test_record(-100, 9, 0);
        muted.mute_until = Some((Utc::now() + Duration::seconds(60)).fixed_offset());

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[muted]])
                .into_connection(),
        );

        let repo = InfractionRepository::new(db);
        let rows = repo.find_muted(-100).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert!(rows[0].mute_until.is_some());
    }

    #[tokio::test]
    async fn test_delete_if_empty_reports_rows_affected() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = InfractionRepository::new(db);
        assert!(repo.delete_if_empty(-100, 7).await.unwrap());
        assert!(!repo.delete_if_empty(-100, 7).await.unwrap());
    }
}
