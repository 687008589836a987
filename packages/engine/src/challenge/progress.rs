use chrono::Utc;
use common::criteria::{merge_progress, snapshot_from_json};
use common::{ChallengeStatus, CriteriaSet, ParticipantStatus};
use sea_orm::prelude::Expr;
use sea_orm::*;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::lifecycle::refresh_rankings;
use super::{find_challenge, find_participant};
use crate::badges::check_and_award_badges;
use crate::entity::challenge_participant;
use crate::error::{EngineError, Result};
use crate::metrics::record_challenge_completed;
use crate::notify::NotificationEvent;
use crate::state::EngineState;

/// Merge a partial progress document into the participant's progress. Reaching every
/// criterion completes the participant.
#[instrument(skip(state, patch))]
pub async fn update_participant_progress(
    state: &EngineState,
    user_id: i32,
    challenge_id: i32,
    patch: serde_json::Value,
) -> Result<challenge_participant::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    if challenge.status != ChallengeStatus::Active {
        return Err(EngineError::Conflict(format!(
            "Progress can only be recorded while the challenge is active (it is {})",
            challenge.status
        )));
    }
    let participant = find_participant(&state.db, challenge_id, user_id)
        .await?
        .ok_or_else(|| EngineError::NotFound("Not a participant of this challenge".into()))?;
    if participant.status.is_terminal() {
        return Err(EngineError::Conflict(format!(
            "Participant is already {}",
            participant.status
        )));
    }

    let criteria = CriteriaSet::from_json(&challenge.criteria)?;
    let progress = merge_progress(&criteria, &participant.progress, &patch)?;
    let evaluation = criteria.evaluate(&snapshot_from_json(&progress));

    let now = Utc::now();
    let status = if evaluation.eligible {
        ParticipantStatus::Completed
    } else {
        ParticipantStatus::InProgress
    };
    let mut update = challenge_participant::Entity::update_many()
        .col_expr(challenge_participant::Column::Progress, Expr::value(progress))
        .col_expr(challenge_participant::Column::Status, Expr::value(status))
        .col_expr(challenge_participant::Column::UpdatedAt, Expr::value(now));
    if evaluation.eligible {
        update = update.col_expr(
            challenge_participant::Column::CompletedAt,
            Expr::value(Some(now)),
        );
    }
    let result = update
        .filter(challenge_participant::Column::Id.eq(participant.id))
        .filter(challenge_participant::Column::Status.is_in([
            ParticipantStatus::Joined,
            ParticipantStatus::InProgress,
        ]))
        .exec(&state.db)
        .await?;
    if result.rows_affected == 0 {
        return Err(EngineError::Conflict(
            "Participant status changed concurrently".into(),
        ));
    }

    if evaluation.eligible {
        info!(challenge_id, user_id, "Participant completed challenge");
        if let Err(e) = record_challenge_completed(&state.db, user_id).await {
            warn!(challenge_id, user_id, error = %e, "Failed to count completed challenge");
        }
        state
            .notify(
                user_id,
                NotificationEvent::ChallengeCompleted,
                json!({ "challenge_id": challenge_id }),
            )
            .await;
        refresh_rankings(state, challenge_id).await;

        let has_rewards = challenge
            .rewards
            .as_ref()
            .and_then(|r| r.as_object())
            .is_some_and(|r| !r.is_empty());
        if has_rewards && let Err(e) = check_and_award_badges(state, user_id).await {
            warn!(challenge_id, user_id, error = %e, "Badge re-check failed");
        }
    }

    challenge_participant::Entity::find_by_id(participant.id)
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Participant not found".into()))
}
