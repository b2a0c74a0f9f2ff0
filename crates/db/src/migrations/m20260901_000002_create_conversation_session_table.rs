//! Create conversation session table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConversationSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConversationSession::ChatId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationSession::AdminId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationSession::State)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationSession::CollectedInputs)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationSession::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationSession::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(ConversationSession::ChatId)
                            .col(ConversationSession::AdminId),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: expires_at (for the session sweep)
        manager
            .create_index(
                Index::create()
                    .name("idx_conversation_session_expires_at")
                    .table(ConversationSession::Table)
                    .col(ConversationSession::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConversationSession::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ConversationSession {
    Table,
    ChatId,
    AdminId,
    State,
    CollectedInputs,
    ExpiresAt,
    CreatedAt,
}
