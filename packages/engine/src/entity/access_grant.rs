use common::AccessTier;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Access a non-owner holds on a course. Owners never have a row.
///
/// Soft-deleted rows are restored on re-grant, so the `(course_id, user_id)` pair is unique.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "access_grant")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "course_user")]
    pub course_id: i32,
    #[sea_orm(unique_key = "course_user", indexed)]
    pub user_id: i32,

    pub tier: AccessTier,

    #[sea_orm(default_value = false)]
    pub is_deleted: bool,
    pub deleted_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
