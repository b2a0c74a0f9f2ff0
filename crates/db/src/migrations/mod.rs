//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20260901_000001_create_infraction_table;
mod m20260901_000002_create_conversation_session_table;
mod m20260901_000003_create_action_log_table;
mod m20260901_000004_create_processed_event_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260901_000001_create_infraction_table::Migration),
            Box::new(m20260901_000002_create_conversation_session_table::Migration),
            Box::new(m20260901_000003_create_action_log_table::Migration),
            Box::new(m20260901_000004_create_processed_event_table::Migration),
        ]
    }
}
