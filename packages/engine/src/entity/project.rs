use common::ProjectStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "project")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub batch_id: i32,
    #[sea_orm(belongs_to, from = "batch_id", to = "id")]
    pub batch: HasOne<super::batch::Entity>,

    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub level: String,
    pub status: ProjectStatus,
    pub position: i32,

    /// Learning objectives as an ordered JSON array of strings.
    #[sea_orm(column_type = "JsonBinary")]
    pub objectives: serde_json::Value,

    /// Evaluation score in 0..=100, `None` until evaluated.
    pub evaluation_score: Option<f64>,

    /// Repository on the external service.
    pub repo_id: Option<String>,

    #[sea_orm(has_many)]
    pub steps: HasMany<super::step::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
