use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Accumulated activity counters, one row per user.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i32,

    pub total_commits: i32,
    pub total_reviews: i32,
    pub streak_days: i32,
    pub login_days: i32,
    pub projects_completed: i32,
    pub courses_completed: i32,
    pub challenges_completed: i32,
    pub perfect_score: bool,
    /// Global leaderboard position, if the user has one.
    pub rank: Option<i32>,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
