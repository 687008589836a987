use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An earned badge. Immutable once created.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_badge")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "user_badge", indexed)]
    pub user_id: i32,
    #[sea_orm(unique_key = "user_badge")]
    pub badge_id: i32,
    #[sea_orm(belongs_to, from = "badge_id", to = "id")]
    pub badge: HasOne<super::badge::Entity>,

    pub earned_at: DateTimeUtc,

    /// Evaluation snapshot at award time.
    #[sea_orm(column_type = "JsonBinary")]
    pub progress: serde_json::Value,
}

impl ActiveModelBehavior for ActiveModel {}
