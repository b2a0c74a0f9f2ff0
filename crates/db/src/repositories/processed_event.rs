//! Processed event repository.

use std::sync::Arc;

use crate::entities::{ProcessedEvent, processed_event};
use chrono::{DateTime, FixedOffset};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::OnConflict,
};
use warden_common::{AppError, AppResult};

/// Processed event repository for database operations.
///
/// The first outcome recorded for an event id wins; later inserts for the
/// same id are ignored.
#[derive(Clone)]
pub struct ProcessedEventRepository {
    db: Arc<DatabaseConnection>,
}

impl ProcessedEventRepository {
    /// Create a new processed event repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the recorded outcome of an event.
    pub async fn find(&self, event_id: &str) -> AppResult<Option<processed_event::Model>> {
        ProcessedEvent::find_by_id(event_id.to_string())
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    /// Record an outcome unless the event already has one.
    ///
    /// Returns whether a row was written.
    pub async fn insert(&self, model: processed_event::Model) -> AppResult<bool> {
        let active = processed_event::ActiveModel {
            event_id: Set(model.event_id),
            outcome: Set(model.outcome),
            created_at: Set(model.created_at),
        };

        let rows = ProcessedEvent::insert(active)
            .on_conflict(
                OnConflict::column(processed_event::Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(rows > 0)
    }

    /// Delete outcomes recorded before `cutoff`.
    pub async fn delete_older_than(&self, cutoff: DateTime<FixedOffset>) -> AppResult<u64> {
        let result = ProcessedEvent::delete_many()
            .filter(processed_event::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
