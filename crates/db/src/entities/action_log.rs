//! Action log entity (append-only moderation audit trail).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "action_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub actor_id: i64,

    /// Action kind (warn, mute, ban, ...)
    pub action: String,

    pub target_id: i64,

    #[sea_orm(nullable)]
    pub chat_id: Option<i64>,

    #[sea_orm(nullable)]
    pub detail: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
