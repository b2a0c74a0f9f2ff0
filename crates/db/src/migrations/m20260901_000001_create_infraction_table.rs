//! Create infraction table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Infraction::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Infraction::ChatId).big_integer().not_null())
                    .col(ColumnDef::new(Infraction::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Infraction::WarningCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(Infraction::WarningCount).gte(0)),
                    )
                    .col(ColumnDef::new(Infraction::MuteUntil).timestamp_with_time_zone())
                    .col(ColumnDef::new(Infraction::BanReason).text())
                    .col(
                        ColumnDef::new(Infraction::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(Infraction::ChatId)
                            .col(Infraction::UserId),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: mute_until (for the expiry sweep)
        manager
            .create_index(
                Index::create()
                    .name("idx_infraction_mute_until")
                    .table(Infraction::Table)
                    .col(Infraction::MuteUntil)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Infraction::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Infraction {
    Table,
    ChatId,
    UserId,
    WarningCount,
    MuteUntil,
    BanReason,
    UpdatedAt,
}
