use common::SagaPhase;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persistent trace of one clone operation.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clone_saga")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub grantee_id: i32,
    pub source_course_id: i32,
    pub source_project_id: Option<i32>,

    /// The cloned course, once the local phase committed.
    pub course_id: Option<i32>,

    #[sea_orm(indexed)]
    pub phase: SagaPhase,
    /// External-phase attempts made so far.
    pub attempts: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
