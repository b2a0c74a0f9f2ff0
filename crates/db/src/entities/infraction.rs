//! Infraction entity (per chat, per user moderation state).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "infraction")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,

    /// Active warnings, never negative
    pub warning_count: i32,

    /// When the current mute ends (NULL = not muted)
    #[sea_orm(nullable)]
    pub mute_until: Option<DateTimeWithTimeZone>,

    /// Why the user was banned (NULL = not banned)
    #[sea_orm(nullable)]
    pub ban_reason: Option<String>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
