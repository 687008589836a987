//! Scoring & Ranking Engine persistence: points from cloned-course evaluations, rank
//! recomputation and leaderboards.
//!
//! Recomputation is idempotent and re-runnable. Two concurrent runs for the same challenge
//! may interleave their writes; the next run converges them.

use chrono::{DateTime, Utc};
use common::ranking::round_points;
use common::{
    BadgeRef, ParticipantStatus, RankedStanding, RewardTable, Standing, rank_standings,
};
use sea_orm::prelude::Expr;
use sea_orm::*;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::badges::{award_badge, resolve_badge};
use crate::courses::{course_project_ids, find_project};
use crate::entity::{challenge, challenge_participant, project, user};
use crate::error::{EngineError, Result};
use crate::state::EngineState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub participant_id: i32,
    pub user_id: i32,
    pub username: String,
    pub status: ParticipantStatus,
    pub points: i32,
    pub rank: Option<i32>,
    pub joined_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub challenge_id: i32,
    pub entries: Vec<LeaderboardEntry>,
}

/// Sum of the evaluation scores in a cloned course, missing scores counting as zero.
pub async fn compute_points<C: ConnectionTrait>(db: &C, course_id: Option<i32>) -> Result<i32> {
    let Some(course_id) = course_id else {
        return Ok(0);
    };
    let project_ids = course_project_ids(db, course_id).await?;
    if project_ids.is_empty() {
        return Ok(0);
    }

    let scores: Vec<Option<f64>> = project::Entity::find()
        .filter(project::Column::Id.is_in(project_ids))
        .select_only()
        .column(project::Column::EvaluationScore)
        .into_tuple()
        .all(db)
        .await?;
    Ok(round_points(scores.into_iter().flatten().sum()))
}

/// Recompute one participant's points and store them.
pub async fn update_participant_points<C: ConnectionTrait>(
    db: &C,
    participant: &challenge_participant::Model,
) -> Result<i32> {
    let points = compute_points(db, participant.challenge_course_id).await?;
    if points != participant.points {
        challenge_participant::Entity::update_many()
            .col_expr(challenge_participant::Column::Points, Expr::value(points))
            .filter(challenge_participant::Column::Id.eq(participant.id))
            .exec(db)
            .await?;
    }
    Ok(points)
}

/// Refresh every participant's points, then rewrite ranks. `FAILED` and `LEFT` end up unranked.
#[instrument(skip(db))]
pub async fn update_challenge_rankings<C: ConnectionTrait>(
    db: &C,
    challenge_id: i32,
) -> Result<Vec<RankedStanding>> {
    let participants = challenge_participant::Entity::find()
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .all(db)
        .await?;

    let mut standings = Vec::with_capacity(participants.len());
    for p in &participants {
        let points = if p.status == ParticipantStatus::Left {
            p.points
        } else {
            update_participant_points(db, p).await?
        };
        standings.push(Standing {
            participant_id: p.id,
            status: p.status,
            points,
            completed_at: p.completed_at,
            joined_at: p.joined_at,
        });
    }

    let ranked = rank_standings(standings);
    for entry in &ranked {
        let current = participants
            .iter()
            .find(|p| p.id == entry.standing.participant_id)
            .and_then(|p| p.rank);
        if current != entry.rank {
            challenge_participant::Entity::update_many()
                .col_expr(challenge_participant::Column::Rank, Expr::value(entry.rank))
                .filter(challenge_participant::Column::Id.eq(entry.standing.participant_id))
                .exec(db)
                .await?;
        }
    }

    // Left participants are dropped from the ranking; clear any stale rank.
    challenge_participant::Entity::update_many()
        .col_expr(
            challenge_participant::Column::Rank,
            Expr::value(Option::<i32>::None),
        )
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_participant::Column::Status.eq(ParticipantStatus::Left))
        .filter(challenge_participant::Column::Rank.is_not_null())
        .exec(db)
        .await?;

    Ok(ranked)
}

/// Recompute and return the leaderboard: ranked participants first, then failed ones.
#[instrument(skip(state))]
pub async fn compute_leaderboard(state: &EngineState, challenge_id: i32) -> Result<Leaderboard> {
    challenge::Entity::find_by_id(challenge_id)
        .filter(challenge::Column::IsDeleted.eq(false))
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Challenge not found".into()))?;

    let ranked = update_challenge_rankings(&state.db, challenge_id).await?;

    let participants = challenge_participant::Entity::find()
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .all(&state.db)
        .await?;
    let user_ids: Vec<i32> = participants.iter().map(|p| p.user_id).collect();
    let users = user::Entity::find()
        .filter(user::Column::Id.is_in(user_ids))
        .all(&state.db)
        .await?;

    let entries = ranked
        .into_iter()
        .filter_map(|entry| {
            let p = participants
                .iter()
                .find(|p| p.id == entry.standing.participant_id)?;
            let username = users
                .iter()
                .find(|u| u.id == p.user_id)
                .map(|u| u.username.clone())
                .unwrap_or_default();
            Some(LeaderboardEntry {
                participant_id: p.id,
                user_id: p.user_id,
                username,
                status: entry.standing.status,
                points: entry.standing.points,
                rank: entry.rank,
                joined_at: p.joined_at,
                completed_at: p.completed_at,
            })
        })
        .collect();

    Ok(Leaderboard {
        challenge_id,
        entries,
    })
}

/// Store a project's evaluation score (0..=100) and refresh the rankings that depend on it.
#[instrument(skip(state))]
pub async fn record_evaluation(
    state: &EngineState,
    project_id: i32,
    score: f64,
) -> Result<project::Model> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(EngineError::Validation(
            "Evaluation score must be between 0 and 100".into(),
        ));
    }
    let (project, _, course) = find_project(&state.db, project_id).await?;

    let mut active: project::ActiveModel = project.into();
    active.evaluation_score = Set(Some(score));
    active.updated_at = Set(Utc::now());
    let project = active.update(&state.db).await?;

    let challenge_ids: Vec<i32> = challenge_participant::Entity::find()
        .filter(challenge_participant::Column::ChallengeCourseId.eq(course.id))
        .select_only()
        .column(challenge_participant::Column::ChallengeId)
        .distinct()
        .into_tuple()
        .all(&state.db)
        .await?;
    for challenge_id in challenge_ids {
        if let Err(e) = update_challenge_rankings(&state.db, challenge_id).await {
            warn!(challenge_id, error = %e, "Failed to refresh rankings after evaluation");
        }
    }

    Ok(project)
}

/// Award rank rewards of a completed challenge. Failures are logged and skipped.
/// Returns the number of badges awarded.
pub async fn distribute_rewards(
    state: &EngineState,
    challenge: &challenge::Model,
    ranked: &[RankedStanding],
) -> usize {
    let Some(rewards) = challenge.rewards.as_ref() else {
        return 0;
    };
    let table = match RewardTable::from_json(rewards) {
        Ok(table) if !table.is_empty() => table,
        Ok(_) => return 0,
        Err(e) => {
            warn!(challenge_id = challenge.id, error = %e, "Ignoring malformed rewards");
            return 0;
        }
    };

    let participants = match challenge_participant::Entity::find()
        .filter(challenge_participant::Column::ChallengeId.eq(challenge.id))
        .all(&state.db)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            warn!(challenge_id = challenge.id, error = %e, "Failed to load participants for rewards");
            return 0;
        }
    };

    let mut awarded = 0;
    for entry in ranked {
        let Some(rank) = entry.rank else { continue };
        let Some(reference) = table.lookup(rank) else {
            continue;
        };
        let Some(p) = participants
            .iter()
            .find(|p| p.id == entry.standing.participant_id)
        else {
            continue;
        };

        match award_reward(state, p.user_id, reference).await {
            Ok(()) => awarded += 1,
            Err(e) => warn!(
                challenge_id = challenge.id,
                user_id = p.user_id,
                rank,
                error = %e,
                "Failed to award challenge reward"
            ),
        }
    }

    if awarded > 0 {
        info!(challenge_id = challenge.id, awarded, "Distributed challenge rewards");
    }
    awarded
}

async fn award_reward(state: &EngineState, user_id: i32, reference: &BadgeRef) -> Result<()> {
    let badge = resolve_badge(&state.db, reference)
        .await?
        .ok_or_else(|| EngineError::NotFound("Reward badge not found".into()))?;
    award_badge(state, user_id, badge.id).await?;
    Ok(())
}
