//! Metric Snapshot Provider: a user's activity counters as a flat key -> value map.

use chrono::Utc;
use common::{MetricSnapshot, MetricValue};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::ExprTrait;
use sea_orm::*;

use crate::entity::user_stats;
use crate::error::Result;

pub const TOTAL_COMMITS: &str = "totalCommits";
pub const TOTAL_REVIEWS: &str = "totalReviews";
pub const STREAK_DAYS: &str = "streakDays";
pub const LOGIN_DAYS: &str = "loginDays";
pub const PROJECTS_COMPLETED: &str = "projectsCompleted";
pub const COURSES_COMPLETED: &str = "coursesCompleted";
pub const CHALLENGES_COMPLETED: &str = "challengesCompleted";
pub const PERFECT_SCORE: &str = "perfectScore";
pub const RANK: &str = "rank";

pub fn snapshot_from_stats(stats: &user_stats::Model) -> MetricSnapshot {
    let mut snapshot = MetricSnapshot::from([
        (TOTAL_COMMITS.to_string(), MetricValue::from(stats.total_commits)),
        (TOTAL_REVIEWS.to_string(), stats.total_reviews.into()),
        (STREAK_DAYS.to_string(), stats.streak_days.into()),
        (LOGIN_DAYS.to_string(), stats.login_days.into()),
        (PROJECTS_COMPLETED.to_string(), stats.projects_completed.into()),
        (COURSES_COMPLETED.to_string(), stats.courses_completed.into()),
        (
            CHALLENGES_COMPLETED.to_string(),
            stats.challenges_completed.into(),
        ),
        (PERFECT_SCORE.to_string(), stats.perfect_score.into()),
    ]);
    if let Some(rank) = stats.rank {
        snapshot.insert(RANK.to_string(), rank.into());
    }
    snapshot
}

/// Current snapshot for `user_id`. Empty when the user has no recorded activity.
pub async fn load_snapshot<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<MetricSnapshot> {
    Ok(user_stats::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .map(|stats| snapshot_from_stats(&stats))
        .unwrap_or_default())
}

/// Bump `challengesCompleted`, creating the stats row on first use.
pub async fn record_challenge_completed<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<()> {
    let now = Utc::now();
    let result = user_stats::Entity::update_many()
        .col_expr(
            user_stats::Column::ChallengesCompleted,
            Expr::col(user_stats::Column::ChallengesCompleted).add(1),
        )
        .col_expr(user_stats::Column::UpdatedAt, Expr::value(now))
        .filter(user_stats::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    if result.rows_affected > 0 {
        return Ok(());
    }

    let row = user_stats::ActiveModel {
        user_id: Set(user_id),
        total_commits: Set(0),
        total_reviews: Set(0),
        streak_days: Set(0),
        login_days: Set(0),
        projects_completed: Set(0),
        courses_completed: Set(0),
        challenges_completed: Set(1),
        perfect_score: Set(false),
        rank: Set(None),
        updated_at: Set(now),
    };
    match user_stats::Entity::insert(row).exec_without_returning(db).await {
        Ok(_) => Ok(()),
        // Created concurrently; count on the existing row instead.
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            user_stats::Entity::update_many()
                .col_expr(
                    user_stats::Column::ChallengesCompleted,
                    Expr::col(user_stats::Column::ChallengesCompleted).add(1),
                )
                .filter(user_stats::Column::UserId.eq(user_id))
                .exec(db)
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
