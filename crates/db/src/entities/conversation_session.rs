//! Conversation session entity (open admin panel flows).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversation_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_id: i64,

    /// The admin driving the flow
    #[sea_orm(primary_key, auto_increment = false)]
    pub admin_id: i64,

    /// Serialized flow state
    #[sea_orm(column_type = "JsonBinary")]
    pub state: Json,

    /// Inputs gathered so far, in order
    #[sea_orm(column_type = "JsonBinary")]
    pub collected_inputs: Json,

    pub expires_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
