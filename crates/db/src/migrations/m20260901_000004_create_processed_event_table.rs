//! Create processed event table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProcessedEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessedEvent::EventId)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProcessedEvent::Outcome).json_binary().not_null())
                    .col(
                        ColumnDef::new(ProcessedEvent::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: created_at for retention purges
        manager
            .create_index(
                Index::create()
                    .name("idx_processed_event_created_at")
                    .table(ProcessedEvent::Table)
                    .col(ProcessedEvent::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProcessedEvent::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ProcessedEvent {
    Table,
    EventId,
    Outcome,
    CreatedAt,
}
