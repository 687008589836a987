use chrono::Utc;
use common::{ChallengeStatus, InvitationStatus, ParticipantStatus};
use sea_orm::prelude::Expr;
use sea_orm::*;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::{find_challenge, find_participant, participants_in, source_course_id, transition_challenge};
use crate::access::{AccessGrants, AccessLevel};
use crate::entity::{challenge, challenge_invite, challenge_participant, challenge_request, user};
use crate::error::{EngineError, Result};
use crate::notify::NotificationEvent;
use crate::replication::{CloneOptions, CloneSource, replicate};
use crate::scoring::{distribute_rewards, update_challenge_rankings};
use crate::state::EngineState;
use crate::users::find_user;

/// Join a challenge. Private challenges need an accepted invite or an approved request.
#[instrument(skip(state))]
pub async fn join_challenge(
    state: &EngineState,
    user_id: i32,
    challenge_id: i32,
) -> Result<challenge_participant::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    if !challenge.is_public
        && challenge.creator_id != user_id
        && !has_admission(&state.db, challenge_id, user_id).await?
    {
        return Err(EngineError::Forbidden(
            "This challenge is private; an invitation or approved request is required".into(),
        ));
    }
    join_authorized(state, user_id, challenge).await
}

async fn has_admission<C: ConnectionTrait>(db: &C, challenge_id: i32, user_id: i32) -> Result<bool> {
    let invited = challenge_invite::Entity::find()
        .filter(challenge_invite::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_invite::Column::InviteeId.eq(user_id))
        .filter(challenge_invite::Column::Status.eq(InvitationStatus::Accepted))
        .one(db)
        .await?
        .is_some();
    if invited {
        return Ok(true);
    }
    Ok(challenge_request::Entity::find()
        .filter(challenge_request::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_request::Column::UserId.eq(user_id))
        .filter(challenge_request::Column::Status.eq(InvitationStatus::Approved))
        .one(db)
        .await?
        .is_some())
}

fn audience_allows(challenge: &challenge::Model, user: &user::Model) -> bool {
    let group_ok = challenge.group_id.is_none_or(|g| user.group_id == Some(g));
    let sector_ok = challenge.sector_id.is_none_or(|s| user.sector_id == Some(s));
    group_ok && sector_ok
}

/// Join without the private-challenge admission check. Invitation acceptance and request
/// approval call this while their offer is still pending.
pub(crate) async fn join_authorized(
    state: &EngineState,
    user_id: i32,
    challenge: challenge::Model,
) -> Result<challenge_participant::Model> {
    let challenge_id = challenge.id;
    if !challenge.status.accepts_participants() {
        return Err(EngineError::Conflict(format!(
            "Challenge is {} and no longer accepts participants",
            challenge.status
        )));
    }
    if find_participant(&state.db, challenge_id, user_id)
        .await?
        .is_some()
    {
        return Err(EngineError::Conflict(
            "Already a participant of this challenge".into(),
        ));
    }

    let user = find_user(&state.db, user_id).await?;
    if !audience_allows(&challenge, &user) {
        return Err(EngineError::Forbidden(
            "This challenge is restricted to another group or sector".into(),
        ));
    }

    if let Some(cap) = challenge.max_participants {
        let enrolled = challenge_participant::Entity::find()
            .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
            .filter(challenge_participant::Column::Status.is_in(ParticipantStatus::ENROLLED.iter().copied()))
            .count(&state.db)
            .await?;
        if enrolled >= cap as u64 {
            return Err(EngineError::Conflict("Challenge is full".into()));
        }
    }

    let source = match (challenge.course_id, challenge.project_id) {
        (Some(course_id), _) => Some(CloneSource::Course(course_id)),
        (None, Some(project_id)) => Some(CloneSource::Project(project_id)),
        (None, None) => None,
    };
    let source_course = source_course_id(&state.db, &challenge).await?;

    let status = if challenge.status == ChallengeStatus::Active {
        ParticipantStatus::InProgress
    } else {
        ParticipantStatus::Joined
    };

    // The participant row and its SYNC_COPY grant land together. A concurrent join of the same
    // user fails on the unique (challenge, user) key before it touches the grant or clones.
    let txn = state.db.begin().await?;
    let now = Utc::now();
    let participant = challenge_participant::ActiveModel {
        challenge_id: Set(challenge_id),
        user_id: Set(user_id),
        status: Set(status),
        progress: Set(json!({})),
        points: Set(0),
        rank: Set(None),
        challenge_course_id: Set(None),
        joined_at: Set(now),
        left_at: Set(None),
        completed_at: Set(None),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(|e| EngineError::from_insert(e, "Already a participant of this challenge"))?;
    let previous_access = match source_course {
        Some(course_id) => {
            let grants = AccessGrants::new(&txn);
            let previous = grants.check(user_id, course_id).await?;
            grants.ensure_sync_copy_access(course_id, user_id).await?;
            previous
        }
        None => None,
    };
    txn.commit().await?;

    let participant = match source {
        Some(source) => match attach_clone(state, &user, participant.clone(), source).await {
            Ok(participant) => participant,
            Err(e) => {
                abandon_join(state, participant.id, user_id, source_course, previous_access).await;
                return Err(e);
            }
        },
        None => participant,
    };

    info!(challenge_id, user_id, status = %status, "Joined challenge");
    state
        .notify(
            user_id,
            NotificationEvent::ChallengeJoined,
            json!({ "challenge_id": challenge_id, "course_id": participant.challenge_course_id }),
        )
        .await;
    refresh_rankings(state, challenge_id).await;

    Ok(participant)
}

/// Clone the challenge content for a freshly inserted participant and link the clone.
async fn attach_clone(
    state: &EngineState,
    user: &user::Model,
    participant: challenge_participant::Model,
    source: CloneSource,
) -> Result<challenge_participant::Model> {
    let options = CloneOptions::for_user(&state.config.replication, user);
    let course_id = replicate(state, user.id, source, options, None).await?;
    let mut active: challenge_participant::ActiveModel = participant.into();
    active.challenge_course_id = Set(Some(course_id));
    active.updated_at = Set(Utc::now());
    Ok(active.update(&state.db).await?)
}

/// Drop the participant row of a join whose clone failed and put the grant back.
async fn abandon_join(
    state: &EngineState,
    participant_id: i32,
    user_id: i32,
    source_course: Option<i32>,
    previous_access: Option<AccessLevel>,
) {
    let undo = async {
        let txn = state.db.begin().await?;
        challenge_participant::Entity::delete_by_id(participant_id)
            .exec(&txn)
            .await?;
        if let Some(course_id) = source_course {
            AccessGrants::new(&txn)
                .revert_sync_copy(course_id, user_id, previous_access)
                .await?;
        }
        txn.commit().await?;
        Ok::<_, EngineError>(())
    };
    if let Err(e) = undo.await {
        error!(participant_id, user_id, error = %e, "Failed to undo an abandoned join");
    }
}

/// Leave a challenge. `LEFT` is terminal; the user cannot rejoin under the same row.
#[instrument(skip(state))]
pub async fn leave_challenge(
    state: &EngineState,
    user_id: i32,
    challenge_id: i32,
) -> Result<challenge_participant::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    let participant = find_participant(&state.db, challenge_id, user_id)
        .await?
        .ok_or_else(|| EngineError::NotFound("Not a participant of this challenge".into()))?;
    if !participant.status.can_transition_to(ParticipantStatus::Left) {
        return Err(EngineError::Conflict(format!(
            "Cannot leave a challenge as {}",
            participant.status
        )));
    }

    let source_course = source_course_id(&state.db, &challenge).await?;

    let txn = state.db.begin().await?;
    let now = Utc::now();
    let result = challenge_participant::Entity::update_many()
        .col_expr(
            challenge_participant::Column::Status,
            Expr::value(ParticipantStatus::Left),
        )
        .col_expr(challenge_participant::Column::Rank, Expr::value(Option::<i32>::None))
        .col_expr(challenge_participant::Column::LeftAt, Expr::value(Some(now)))
        .col_expr(challenge_participant::Column::UpdatedAt, Expr::value(now))
        .filter(challenge_participant::Column::Id.eq(participant.id))
        .filter(challenge_participant::Column::Status.is_in([
            ParticipantStatus::Joined,
            ParticipantStatus::InProgress,
        ]))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(EngineError::Conflict(
            "Participant status changed concurrently".into(),
        ));
    }
    if let Some(course_id) = source_course {
        AccessGrants::new(&txn)
            .downgrade_sync_copy_to_copy(course_id, user_id)
            .await?;
    }
    txn.commit().await?;

    info!(challenge_id, user_id, "Left challenge");
    state
        .notify(
            user_id,
            NotificationEvent::ChallengeLeft,
            json!({ "challenge_id": challenge_id }),
        )
        .await;
    refresh_rankings(state, challenge_id).await;

    challenge_participant::Entity::find_by_id(participant.id)
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Participant not found".into()))
}

fn require_creator(challenge: &challenge::Model, actor_id: i32) -> Result<()> {
    if challenge.creator_id != actor_id {
        return Err(EngineError::Forbidden(
            "Only the challenge creator can do this".into(),
        ));
    }
    Ok(())
}

/// Manually start a draft challenge.
#[instrument(skip(state))]
pub async fn activate_challenge(
    state: &EngineState,
    actor_id: i32,
    challenge_id: i32,
) -> Result<challenge::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    require_creator(&challenge, actor_id)?;
    if !activate(state, challenge_id).await? {
        return Err(EngineError::Conflict(format!(
            "Cannot activate a challenge that is {}",
            challenge.status
        )));
    }
    find_challenge(&state.db, challenge_id).await
}

/// Manually end a draft or active challenge.
#[instrument(skip(state))]
pub async fn complete_challenge(
    state: &EngineState,
    actor_id: i32,
    challenge_id: i32,
) -> Result<challenge::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    require_creator(&challenge, actor_id)?;
    if complete(state, challenge_id).await?.is_none() {
        return Err(EngineError::Conflict(format!(
            "Cannot complete a challenge that is {}",
            challenge.status
        )));
    }
    find_challenge(&state.db, challenge_id).await
}

/// `DRAFT -> ACTIVE`, promoting queued participants to `IN_PROGRESS`.
/// Returns `false` if the challenge was not a draft.
pub(crate) async fn activate(state: &EngineState, challenge_id: i32) -> Result<bool> {
    let txn = state.db.begin().await?;
    if !transition_challenge(
        &txn,
        challenge_id,
        &[ChallengeStatus::Draft],
        ChallengeStatus::Active,
    )
    .await?
    {
        return Ok(false);
    }
    let queued = participants_in(&txn, challenge_id, &[ParticipantStatus::Joined]).await?;
    challenge_participant::Entity::update_many()
        .col_expr(
            challenge_participant::Column::Status,
            Expr::value(ParticipantStatus::InProgress),
        )
        .col_expr(challenge_participant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_participant::Column::Status.eq(ParticipantStatus::Joined))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    info!(challenge_id, promoted = queued.len(), "Activated challenge");
    for p in &queued {
        state
            .notify(
                p.user_id,
                NotificationEvent::ChallengeStarted,
                json!({ "challenge_id": challenge_id }),
            )
            .await;
    }
    Ok(true)
}

/// Participant outcome of a completed challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Completion {
    pub failed: usize,
    pub rewards: usize,
}

/// `DRAFT | ACTIVE -> COMPLETED`. Unfinished participants become `FAILED` (unranked) and a
/// public challenge hands out its rank rewards. Returns `None` if the challenge was already
/// terminal.
pub(crate) async fn complete(state: &EngineState, challenge_id: i32) -> Result<Option<Completion>> {
    let txn = state.db.begin().await?;
    if !transition_challenge(
        &txn,
        challenge_id,
        &[ChallengeStatus::Draft, ChallengeStatus::Active],
        ChallengeStatus::Completed,
    )
    .await?
    {
        return Ok(None);
    }
    let unfinished = participants_in(
        &txn,
        challenge_id,
        &[ParticipantStatus::Joined, ParticipantStatus::InProgress],
    )
    .await?;
    challenge_participant::Entity::update_many()
        .col_expr(
            challenge_participant::Column::Status,
            Expr::value(ParticipantStatus::Failed),
        )
        .col_expr(challenge_participant::Column::Rank, Expr::value(Option::<i32>::None))
        .col_expr(challenge_participant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_participant::Column::Status.is_in([
            ParticipantStatus::Joined,
            ParticipantStatus::InProgress,
        ]))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    let challenge = challenge::Entity::find_by_id(challenge_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Challenge not found".into()))?;

    let mut outcome = Completion {
        failed: unfinished.len(),
        rewards: 0,
    };
    match update_challenge_rankings(&state.db, challenge_id).await {
        Ok(ranked) if challenge.is_public => {
            outcome.rewards = distribute_rewards(state, &challenge, &ranked).await;
        }
        Ok(_) => {}
        Err(e) => warn!(challenge_id, error = %e, "Failed to rank completed challenge"),
    }

    info!(challenge_id, failed = outcome.failed, rewards = outcome.rewards, "Completed challenge");
    for p in &unfinished {
        state
            .notify(
                p.user_id,
                NotificationEvent::ChallengeFailed,
                json!({ "challenge_id": challenge_id }),
            )
            .await;
    }
    let finished = participants_in(&state.db, challenge_id, &[ParticipantStatus::Completed]).await?;
    for p in &finished {
        state
            .notify(
                p.user_id,
                NotificationEvent::ChallengeCompleted,
                json!({ "challenge_id": challenge_id, "rank": p.rank, "points": p.points }),
            )
            .await;
    }

    Ok(Some(outcome))
}

/// Soft-delete a challenge. Participants lose `SYNC_COPY`, a draft or active challenge is
/// forced to `CANCELLED`, and pending invites and requests are cancelled.
#[instrument(skip(state))]
pub async fn delete_challenge(state: &EngineState, actor_id: i32, challenge_id: i32) -> Result<()> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    require_creator(&challenge, actor_id)?;

    let active = participants_in(
        &state.db,
        challenge_id,
        &[ParticipantStatus::Joined, ParticipantStatus::InProgress],
    )
    .await?;
    let source = source_course_id(&state.db, &challenge).await?;

    let txn = state.db.begin().await?;
    if let Some(course_id) = source {
        let grants = AccessGrants::new(&txn);
        let enrolled = participants_in(&txn, challenge_id, ParticipantStatus::ENROLLED).await?;
        for p in &enrolled {
            grants.downgrade_sync_copy_to_copy(course_id, p.user_id).await?;
        }
    }

    let now = Utc::now();
    let status = if challenge.status.accepts_participants() {
        ChallengeStatus::Cancelled
    } else {
        challenge.status
    };
    challenge::Entity::update_many()
        .col_expr(challenge::Column::Status, Expr::value(status))
        .col_expr(challenge::Column::IsDeleted, Expr::value(true))
        .col_expr(challenge::Column::DeletedAt, Expr::value(Some(now)))
        .col_expr(challenge::Column::UpdatedAt, Expr::value(now))
        .filter(challenge::Column::Id.eq(challenge_id))
        .filter(challenge::Column::IsDeleted.eq(false))
        .exec(&txn)
        .await?;

    challenge_invite::Entity::update_many()
        .col_expr(
            challenge_invite::Column::Status,
            Expr::value(InvitationStatus::Cancelled),
        )
        .col_expr(challenge_invite::Column::RespondedAt, Expr::value(Some(now)))
        .filter(challenge_invite::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_invite::Column::Status.eq(InvitationStatus::Pending))
        .exec(&txn)
        .await?;
    challenge_request::Entity::update_many()
        .col_expr(
            challenge_request::Column::Status,
            Expr::value(InvitationStatus::Cancelled),
        )
        .col_expr(challenge_request::Column::RespondedAt, Expr::value(Some(now)))
        .filter(challenge_request::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_request::Column::Status.eq(InvitationStatus::Pending))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    info!(challenge_id, status = %status, "Deleted challenge");
    for p in &active {
        state
            .notify(
                p.user_id,
                NotificationEvent::ChallengeCancelled,
                json!({ "challenge_id": challenge_id }),
            )
            .await;
    }
    Ok(())
}

pub(crate) async fn refresh_rankings(state: &EngineState, challenge_id: i32) {
    if let Err(e) = update_challenge_rankings(&state.db, challenge_id).await {
        warn!(challenge_id, error = %e, "Failed to refresh rankings");
    }
}
