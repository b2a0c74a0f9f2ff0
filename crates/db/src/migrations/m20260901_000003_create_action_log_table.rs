//! Create action log table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ActionLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ActionLog::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ActionLog::ActorId).big_integer().not_null())
                    .col(ColumnDef::new(ActionLog::Action).string_len(32).not_null())
                    .col(ColumnDef::new(ActionLog::TargetId).big_integer().not_null())
                    .col(ColumnDef::new(ActionLog::ChatId).big_integer())
                    .col(ColumnDef::new(ActionLog::Detail).text())
                    .col(
                        ColumnDef::new(ActionLog::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (chat_id, id) for per-chat history, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_action_log_chat_id")
                    .table(ActionLog::Table)
                    .col(ActionLog::ChatId)
                    .col(ActionLog::Id)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ActionLog::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ActionLog {
    Table,
    Id,
    ActorId,
    Action,
    TargetId,
    ChatId,
    Detail,
    CreatedAt,
}
