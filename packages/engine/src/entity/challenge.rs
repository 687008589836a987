use common::{ChallengeStatus, ChallengeType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "challenge")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String, // in Markdown
    pub challenge_type: ChallengeType,
    #[sea_orm(indexed)]
    pub status: ChallengeStatus,

    /// Attached course. Mutually exclusive with `project_id`.
    pub course_id: Option<i32>,
    /// Attached single project. Mutually exclusive with `course_id`.
    pub project_id: Option<i32>,

    /// Target audience. At most one of the two is set.
    pub group_id: Option<i32>,
    pub sector_id: Option<i32>,

    pub start_date: Option<DateTimeUtc>,
    pub end_date: Option<DateTimeUtc>,

    /// Named thresholds, same shape as badge criteria.
    #[sea_orm(column_type = "JsonBinary")]
    pub criteria: serde_json::Value,
    /// Rank or rank range -> badge reference, e.g. `{"1": 4, "2-3": "Podium"}`.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub rewards: Option<serde_json::Value>,

    pub max_participants: Option<i32>,
    pub creator_id: i32,
    pub is_public: bool,

    #[sea_orm(has_many)]
    pub participants: HasMany<super::challenge_participant::Entity>,

    #[sea_orm(default_value = false, indexed)]
    pub is_deleted: bool,
    pub deleted_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
