use common::ParticipantStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "challenge_participant")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "challenge_user")]
    pub challenge_id: i32,
    #[sea_orm(belongs_to, from = "challenge_id", to = "id")]
    pub challenge: HasOne<super::challenge::Entity>,

    #[sea_orm(unique_key = "challenge_user", indexed)]
    pub user_id: i32,

    pub status: ParticipantStatus,

    /// Subset of the challenge's criteria keys -> current value.
    #[sea_orm(column_type = "JsonBinary")]
    pub progress: serde_json::Value,

    pub points: i32,
    /// Always `None` for `FAILED` and `LEFT`.
    pub rank: Option<i32>,

    /// The participant's private replica used to compute points.
    pub challenge_course_id: Option<i32>,

    pub joined_at: DateTimeUtc,
    pub left_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
