//! Processed event entity (outcomes of handled inbound events).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processed_event")]
pub struct Model {
    /// Transport-scoped event id, e.g. `telegram:1234`
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,

    /// Reply produced the first time the event was handled
    #[sea_orm(column_type = "JsonBinary")]
    pub outcome: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
