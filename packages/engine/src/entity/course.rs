use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "course")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String, // in Markdown
    pub status: String,

    #[sea_orm(indexed)]
    pub owner_id: i32,

    /// Set only on clones; the course this one was replicated from.
    #[sea_orm(indexed)]
    pub source_course_id: Option<i32>,
    /// Set only on single-project clones.
    pub source_project_id: Option<i32>,

    #[sea_orm(has_many)]
    pub batches: HasMany<super::batch::Entity>,

    #[sea_orm(default_value = false, indexed)]
    pub is_deleted: bool,
    pub deleted_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
