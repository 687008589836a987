//! Invitation Manager: time-boxed, single-use offers.
//!
//! Challenge invites (creator -> user), join requests for private challenges
//! (user -> creator) and course invites (owner -> user). Every response is a conditional
//! update from `PENDING`; once an offer leaves `PENDING` it never changes again. When the
//! action behind an acceptance fails, the offer stays `PENDING`.

use chrono::{DateTime, Duration, Utc};
use common::{AccessTier, InvitationStatus};
use sea_orm::prelude::Expr;
use sea_orm::*;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::access::AccessGrants;
use crate::challenge::{find_challenge, find_participant, join_authorized};
use crate::courses::find_course;
use crate::entity::{
    access_grant, challenge_invite, challenge_participant, challenge_request, course_invite,
};
use crate::error::{EngineError, Result};
use crate::notify::NotificationEvent;
use crate::replication::{CloneOptions, CloneSource, replicate};
use crate::state::EngineState;
use crate::users::find_user;

/// Move one pending offer to `$to`. Evaluates to `Result<bool, DbErr>`: whether this call
/// made the move.
macro_rules! settle {
    ($db:expr, $entity:ident, $id:expr, $to:expr $(, $col:ident => $val:expr)*) => {
        $entity::Entity::update_many()
            .col_expr($entity::Column::Status, Expr::value($to))
            .col_expr($entity::Column::RespondedAt, Expr::value(Some(Utc::now())))
            $(.col_expr($entity::Column::$col, Expr::value($val)))*
            .filter($entity::Column::Id.eq($id))
            .filter($entity::Column::Status.eq(InvitationStatus::Pending))
            .exec($db)
            .await
            .map(|r| r.rows_affected > 0)
    };
}

/// Mark every pending offer of `$entity` whose deadline passed as `EXPIRED`.
macro_rules! expire {
    ($db:expr, $entity:ident, $now:expr $(, $col:ident => $val:expr)*) => {
        $entity::Entity::update_many()
            .col_expr($entity::Column::Status, Expr::value(InvitationStatus::Expired))
            .filter($entity::Column::Status.eq(InvitationStatus::Pending))
            .filter($entity::Column::ExpiresAt.lte($now))
            $(.filter($entity::Column::$col.eq($val)))*
            .exec($db)
            .await
            .map(|r| r.rows_affected)
    };
}

/// Whether a pending offer can still be answered. A final status is a `Conflict`.
fn open_offer(status: InvitationStatus, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
    if status.is_final() {
        return Err(EngineError::Conflict(format!(
            "This offer is already {status}"
        )));
    }
    Ok(expires_at > now)
}

fn expired() -> EngineError {
    EngineError::Validation("This offer has expired".into())
}

fn expiry(state: &EngineState, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(state.config.invitations.ttl_hours)
}

/// Expire every stale pending offer. Returns how many were expired.
pub async fn expire_stale<C: ConnectionTrait>(db: &C, now: DateTime<Utc>) -> Result<u64> {
    let invites = expire!(db, challenge_invite, now)?;
    let requests = expire!(db, challenge_request, now)?;
    let course_invites = expire!(db, course_invite, now)?;
    Ok(invites + requests + course_invites)
}

async fn ensure_not_participant(state: &EngineState, challenge_id: i32, user_id: i32) -> Result<()> {
    if find_participant(&state.db, challenge_id, user_id)
        .await?
        .is_some()
    {
        return Err(EngineError::Conflict(
            "User is already a participant of this challenge".into(),
        ));
    }
    Ok(())
}

async fn find_challenge_invite(state: &EngineState, id: i32) -> Result<challenge_invite::Model> {
    challenge_invite::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Invite not found".into()))
}

#[instrument(skip(state, message))]
pub async fn invite_to_challenge(
    state: &EngineState,
    inviter_id: i32,
    challenge_id: i32,
    invitee_id: i32,
    message: Option<String>,
) -> Result<challenge_invite::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    if challenge.creator_id != inviter_id {
        return Err(EngineError::Forbidden(
            "Only the challenge creator can invite".into(),
        ));
    }
    if invitee_id == inviter_id {
        return Err(EngineError::Validation("Cannot invite yourself".into()));
    }
    if !challenge.status.accepts_participants() {
        return Err(EngineError::Conflict(format!(
            "Challenge is {} and no longer accepts participants",
            challenge.status
        )));
    }
    find_user(&state.db, invitee_id).await?;
    ensure_not_participant(state, challenge_id, invitee_id).await?;

    let now = Utc::now();
    expire!(&state.db, challenge_invite, now, ChallengeId => challenge_id, InviteeId => invitee_id)?;
    let pending = challenge_invite::Entity::find()
        .filter(challenge_invite::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_invite::Column::InviteeId.eq(invitee_id))
        .filter(challenge_invite::Column::Status.eq(InvitationStatus::Pending))
        .count(&state.db)
        .await?;
    if pending > 0 {
        return Err(EngineError::Conflict(
            "A pending invite already exists for this user".into(),
        ));
    }

    let invite = challenge_invite::ActiveModel {
        challenge_id: Set(challenge_id),
        inviter_id: Set(inviter_id),
        invitee_id: Set(invitee_id),
        status: Set(InvitationStatus::Pending),
        message: Set(message),
        expires_at: Set(expiry(state, now)),
        responded_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(invite_id = invite.id, challenge_id, invitee_id, "Sent challenge invite");
    state
        .notify(
            invitee_id,
            NotificationEvent::InviteReceived,
            json!({ "invite_id": invite.id, "challenge_id": challenge_id, "name": challenge.name }),
        )
        .await;
    Ok(invite)
}

/// Accept a challenge invite and join the challenge.
#[instrument(skip(state))]
pub async fn accept_challenge_invite(
    state: &EngineState,
    user_id: i32,
    invite_id: i32,
) -> Result<challenge_participant::Model> {
    let invite = find_challenge_invite(state, invite_id).await?;
    if invite.invitee_id != user_id {
        return Err(EngineError::Forbidden("This invite is not addressed to you".into()));
    }
    if !open_offer(invite.status, invite.expires_at, Utc::now())? {
        settle!(&state.db, challenge_invite, invite_id, InvitationStatus::Expired)?;
        return Err(expired());
    }

    let challenge = find_challenge(&state.db, invite.challenge_id).await?;
    let participant = join_authorized(state, user_id, challenge).await?;

    if !settle!(&state.db, challenge_invite, invite_id, InvitationStatus::Accepted)? {
        warn!(invite_id, "Invite changed while its acceptance was being processed");
    }
    state
        .notify(
            invite.inviter_id,
            NotificationEvent::InviteAccepted,
            json!({ "invite_id": invite_id, "challenge_id": invite.challenge_id, "user_id": user_id }),
        )
        .await;
    Ok(participant)
}

#[instrument(skip(state))]
pub async fn reject_challenge_invite(
    state: &EngineState,
    user_id: i32,
    invite_id: i32,
) -> Result<challenge_invite::Model> {
    let invite = find_challenge_invite(state, invite_id).await?;
    if invite.invitee_id != user_id {
        return Err(EngineError::Forbidden("This invite is not addressed to you".into()));
    }
    open_offer(invite.status, invite.expires_at, Utc::now())?;
    if !settle!(&state.db, challenge_invite, invite_id, InvitationStatus::Rejected)? {
        return Err(EngineError::Conflict("Invite was answered concurrently".into()));
    }

    state
        .notify(
            invite.inviter_id,
            NotificationEvent::InviteRejected,
            json!({ "invite_id": invite_id, "challenge_id": invite.challenge_id, "user_id": user_id }),
        )
        .await;
    find_challenge_invite(state, invite_id).await
}

#[instrument(skip(state))]
pub async fn cancel_challenge_invite(
    state: &EngineState,
    inviter_id: i32,
    invite_id: i32,
) -> Result<challenge_invite::Model> {
    let invite = find_challenge_invite(state, invite_id).await?;
    if invite.inviter_id != inviter_id {
        return Err(EngineError::Forbidden("Only the inviter can cancel".into()));
    }
    open_offer(invite.status, invite.expires_at, Utc::now())?;
    if !settle!(&state.db, challenge_invite, invite_id, InvitationStatus::Cancelled)? {
        return Err(EngineError::Conflict("Invite was answered concurrently".into()));
    }
    find_challenge_invite(state, invite_id).await
}

async fn find_request(state: &EngineState, id: i32) -> Result<challenge_request::Model> {
    challenge_request::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Request not found".into()))
}

/// Ask the creator of a private challenge for admission.
#[instrument(skip(state, message))]
pub async fn request_to_join(
    state: &EngineState,
    user_id: i32,
    challenge_id: i32,
    message: Option<String>,
) -> Result<challenge_request::Model> {
    let challenge = find_challenge(&state.db, challenge_id).await?;
    if challenge.is_public {
        return Err(EngineError::Validation(
            "Public challenges can be joined directly".into(),
        ));
    }
    if challenge.creator_id == user_id {
        return Err(EngineError::Validation(
            "The creator does not need to request admission".into(),
        ));
    }
    if !challenge.status.accepts_participants() {
        return Err(EngineError::Conflict(format!(
            "Challenge is {} and no longer accepts participants",
            challenge.status
        )));
    }
    ensure_not_participant(state, challenge_id, user_id).await?;

    let now = Utc::now();
    expire!(&state.db, challenge_request, now, ChallengeId => challenge_id, UserId => user_id)?;
    let pending = challenge_request::Entity::find()
        .filter(challenge_request::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_request::Column::UserId.eq(user_id))
        .filter(challenge_request::Column::Status.eq(InvitationStatus::Pending))
        .count(&state.db)
        .await?;
    if pending > 0 {
        return Err(EngineError::Conflict(
            "A pending request already exists".into(),
        ));
    }

    let request = challenge_request::ActiveModel {
        challenge_id: Set(challenge_id),
        user_id: Set(user_id),
        status: Set(InvitationStatus::Pending),
        message: Set(message),
        reviewed_by: Set(None),
        expires_at: Set(expiry(state, now)),
        responded_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(request_id = request.id, challenge_id, user_id, "Requested to join challenge");
    state
        .notify(
            challenge.creator_id,
            NotificationEvent::RequestReceived,
            json!({ "request_id": request.id, "challenge_id": challenge_id, "user_id": user_id }),
        )
        .await;
    Ok(request)
}

async fn reviewable_request(
    state: &EngineState,
    reviewer_id: i32,
    request_id: i32,
) -> Result<challenge_request::Model> {
    let request = find_request(state, request_id).await?;
    let challenge = find_challenge(&state.db, request.challenge_id).await?;
    if challenge.creator_id != reviewer_id {
        return Err(EngineError::Forbidden(
            "Only the challenge creator can review requests".into(),
        ));
    }
    Ok(request)
}

/// Approve a join request; the requester joins the challenge.
#[instrument(skip(state))]
pub async fn approve_request(
    state: &EngineState,
    reviewer_id: i32,
    request_id: i32,
) -> Result<challenge_participant::Model> {
    let request = reviewable_request(state, reviewer_id, request_id).await?;
    if !open_offer(request.status, request.expires_at, Utc::now())? {
        settle!(&state.db, challenge_request, request_id, InvitationStatus::Expired)?;
        return Err(expired());
    }

    let challenge = find_challenge(&state.db, request.challenge_id).await?;
    let participant = join_authorized(state, request.user_id, challenge).await?;

    if !settle!(
        &state.db,
        challenge_request,
        request_id,
        InvitationStatus::Approved,
        ReviewedBy => Some(reviewer_id)
    )? {
        warn!(request_id, "Request changed while its approval was being processed");
    }
    state
        .notify(
            request.user_id,
            NotificationEvent::RequestApproved,
            json!({ "request_id": request_id, "challenge_id": request.challenge_id }),
        )
        .await;
    Ok(participant)
}

#[instrument(skip(state))]
pub async fn reject_request(
    state: &EngineState,
    reviewer_id: i32,
    request_id: i32,
) -> Result<challenge_request::Model> {
    let request = reviewable_request(state, reviewer_id, request_id).await?;
    open_offer(request.status, request.expires_at, Utc::now())?;
    if !settle!(
        &state.db,
        challenge_request,
        request_id,
        InvitationStatus::Rejected,
        ReviewedBy => Some(reviewer_id)
    )? {
        return Err(EngineError::Conflict("Request was answered concurrently".into()));
    }

    state
        .notify(
            request.user_id,
            NotificationEvent::RequestRejected,
            json!({ "request_id": request_id, "challenge_id": request.challenge_id }),
        )
        .await;
    find_request(state, request_id).await
}

#[instrument(skip(state))]
pub async fn cancel_request(
    state: &EngineState,
    user_id: i32,
    request_id: i32,
) -> Result<challenge_request::Model> {
    let request = find_request(state, request_id).await?;
    if request.user_id != user_id {
        return Err(EngineError::Forbidden("Only the requester can cancel".into()));
    }
    open_offer(request.status, request.expires_at, Utc::now())?;
    if !settle!(&state.db, challenge_request, request_id, InvitationStatus::Cancelled)? {
        return Err(EngineError::Conflict("Request was answered concurrently".into()));
    }
    find_request(state, request_id).await
}

async fn find_course_invite(state: &EngineState, id: i32) -> Result<course_invite::Model> {
    course_invite::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Invite not found".into()))
}

/// Result of accepting a course invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseInviteAcceptance {
    pub grant: access_grant::Model,
    /// The invitee's clone, for `COPY` invites.
    pub cloned_course_id: Option<i32>,
}

#[instrument(skip(state))]
pub async fn invite_to_course(
    state: &EngineState,
    owner_id: i32,
    course_id: i32,
    invitee_id: i32,
    tier: AccessTier,
) -> Result<course_invite::Model> {
    if tier == AccessTier::SyncCopy {
        return Err(EngineError::Forbidden(
            "SYNC_COPY access is reserved for challenge participation".into(),
        ));
    }
    let course = find_course(&state.db, course_id).await?;
    if course.owner_id != owner_id {
        return Err(EngineError::Forbidden(
            "Only the course owner can invite".into(),
        ));
    }
    if invitee_id == owner_id {
        return Err(EngineError::Validation(
            "The course owner cannot be invited".into(),
        ));
    }
    find_user(&state.db, invitee_id).await?;

    let now = Utc::now();
    expire!(&state.db, course_invite, now, CourseId => course_id, InviteeId => invitee_id)?;
    let pending = course_invite::Entity::find()
        .filter(course_invite::Column::CourseId.eq(course_id))
        .filter(course_invite::Column::InviteeId.eq(invitee_id))
        .filter(course_invite::Column::Status.eq(InvitationStatus::Pending))
        .count(&state.db)
        .await?;
    if pending > 0 {
        return Err(EngineError::Conflict(
            "A pending invite already exists for this user".into(),
        ));
    }

    let invite = course_invite::ActiveModel {
        course_id: Set(course_id),
        inviter_id: Set(owner_id),
        invitee_id: Set(invitee_id),
        tier: Set(tier),
        status: Set(InvitationStatus::Pending),
        expires_at: Set(expiry(state, now)),
        responded_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(invite_id = invite.id, course_id, invitee_id, tier = %tier, "Sent course invite");
    state
        .notify(
            invitee_id,
            NotificationEvent::InviteReceived,
            json!({ "invite_id": invite.id, "course_id": course_id, "tier": tier }),
        )
        .await;
    Ok(invite)
}

/// Accept a course invite. `COPY` also clones the course into the invitee's namespace.
#[instrument(skip(state))]
pub async fn accept_course_invite(
    state: &EngineState,
    user_id: i32,
    invite_id: i32,
) -> Result<CourseInviteAcceptance> {
    let invite = find_course_invite(state, invite_id).await?;
    if invite.invitee_id != user_id {
        return Err(EngineError::Forbidden("This invite is not addressed to you".into()));
    }
    if !open_offer(invite.status, invite.expires_at, Utc::now())? {
        settle!(&state.db, course_invite, invite_id, InvitationStatus::Expired)?;
        return Err(expired());
    }
    find_course(&state.db, invite.course_id).await?;

    let cloned_course_id = if invite.tier.can_clone() {
        let user = find_user(&state.db, user_id).await?;
        let options = CloneOptions::for_user(&state.config.replication, &user);
        Some(replicate(state, user_id, CloneSource::Course(invite.course_id), options, None).await?)
    } else {
        None
    };
    let grant = AccessGrants::new(&state.db)
        .grant(invite.course_id, user_id, invite.tier)
        .await?;

    if !settle!(&state.db, course_invite, invite_id, InvitationStatus::Accepted)? {
        warn!(invite_id, "Invite changed while its acceptance was being processed");
    }
    info!(invite_id, course_id = invite.course_id, user_id, "Accepted course invite");
    state
        .notify(
            invite.inviter_id,
            NotificationEvent::InviteAccepted,
            json!({ "invite_id": invite_id, "course_id": invite.course_id, "user_id": user_id }),
        )
        .await;

    Ok(CourseInviteAcceptance {
        grant,
        cloned_course_id,
    })
}

#[instrument(skip(state))]
pub async fn reject_course_invite(
    state: &EngineState,
    user_id: i32,
    invite_id: i32,
) -> Result<course_invite::Model> {
    let invite = find_course_invite(state, invite_id).await?;
    if invite.invitee_id != user_id {
        return Err(EngineError::Forbidden("This invite is not addressed to you".into()));
    }
    open_offer(invite.status, invite.expires_at, Utc::now())?;
    if !settle!(&state.db, course_invite, invite_id, InvitationStatus::Rejected)? {
        return Err(EngineError::Conflict("Invite was answered concurrently".into()));
    }

    state
        .notify(
            invite.inviter_id,
            NotificationEvent::InviteRejected,
            json!({ "invite_id": invite_id, "course_id": invite.course_id, "user_id": user_id }),
        )
        .await;
    find_course_invite(state, invite_id).await
}

#[instrument(skip(state))]
pub async fn cancel_course_invite(
    state: &EngineState,
    owner_id: i32,
    invite_id: i32,
) -> Result<course_invite::Model> {
    let invite = find_course_invite(state, invite_id).await?;
    if invite.inviter_id != owner_id {
        return Err(EngineError::Forbidden("Only the inviter can cancel".into()));
    }
    open_offer(invite.status, invite.expires_at, Utc::now())?;
    if !settle!(&state.db, course_invite, invite_id, InvitationStatus::Cancelled)? {
        return Err(EngineError::Conflict("Invite was answered concurrently".into()));
    }
    find_course_invite(state, invite_id).await
}
