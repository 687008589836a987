//! Challenge Lifecycle Manager.
//!
//! Challenge: `DRAFT -> ACTIVE -> COMPLETED`, `DRAFT -> COMPLETED`, `DRAFT -> CANCELLED`.
//! Participant: `JOINED -> IN_PROGRESS -> {COMPLETED | FAILED}`, non-terminal `-> LEFT`.
//! Every status write is conditional on the expected current status.

mod lifecycle;
mod progress;
mod scheduler;

use chrono::{DateTime, Utc};
use common::{ChallengeStatus, ChallengeType, CriteriaSet, ParticipantStatus, RewardTable};
use sea_orm::prelude::Expr;
use sea_orm::*;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::courses::{find_course, find_project};
use crate::entity::{batch, challenge, challenge_participant, project};
use crate::error::{EngineError, Result};
use crate::state::EngineState;

pub use lifecycle::{
    activate_challenge, complete_challenge, delete_challenge, join_challenge, leave_challenge,
};
pub(crate) use lifecycle::join_authorized;
pub use progress::update_participant_progress;
pub use scheduler::{SweepReport, process_scheduled_transitions, run_scheduler};

#[derive(Debug, Clone, Deserialize)]
pub struct NewChallenge {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub challenge_type: ChallengeType,
    pub course_id: Option<i32>,
    pub project_id: Option<i32>,
    pub group_id: Option<i32>,
    pub sector_id: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub criteria: serde_json::Value,
    pub rewards: Option<serde_json::Value>,
    pub max_participants: Option<i32>,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

impl NewChallenge {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "Challenge name must not be empty".into(),
            ));
        }
        if self.course_id.is_some() && self.project_id.is_some() {
            return Err(EngineError::Validation(
                "A challenge attaches either a course or a project, not both".into(),
            ));
        }
        if self.group_id.is_some() && self.sector_id.is_some() {
            return Err(EngineError::Validation(
                "A challenge targets either a group or a sector, not both".into(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && end <= start
        {
            return Err(EngineError::Validation(
                "end_date must be after start_date".into(),
            ));
        }
        if self.challenge_type == ChallengeType::TimeLimited && self.end_date.is_none() {
            return Err(EngineError::Validation(
                "A time-limited challenge needs an end_date".into(),
            ));
        }
        if self.max_participants.is_some_and(|cap| cap < 1) {
            return Err(EngineError::Validation(
                "max_participants must be at least 1".into(),
            ));
        }
        CriteriaSet::from_json(&self.criteria)?;
        if let Some(rewards) = &self.rewards {
            RewardTable::from_json(rewards)?;
        }
        Ok(())
    }
}

/// Look up a live challenge.
pub async fn find_challenge<C: ConnectionTrait>(db: &C, id: i32) -> Result<challenge::Model> {
    challenge::Entity::find_by_id(id)
        .filter(challenge::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Challenge not found".into()))
}

pub async fn find_participant<C: ConnectionTrait>(
    db: &C,
    challenge_id: i32,
    user_id: i32,
) -> Result<Option<challenge_participant::Model>> {
    Ok(challenge_participant::Entity::find()
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_participant::Column::UserId.eq(user_id))
        .one(db)
        .await?)
}

/// The source course participants get `SYNC_COPY` on: the attached course, or the
/// course holding the attached project. Resolves even after the course is soft-deleted.
pub(crate) async fn source_course_id<C: ConnectionTrait>(
    db: &C,
    challenge: &challenge::Model,
) -> Result<Option<i32>> {
    if let Some(course_id) = challenge.course_id {
        return Ok(Some(course_id));
    }
    let Some(project_id) = challenge.project_id else {
        return Ok(None);
    };
    let batch_id: Option<i32> = project::Entity::find_by_id(project_id)
        .select_only()
        .column(project::Column::BatchId)
        .into_tuple()
        .one(db)
        .await?;
    let batch_id = batch_id.ok_or_else(|| EngineError::NotFound("Project not found".into()))?;
    let course_id: Option<i32> = batch::Entity::find_by_id(batch_id)
        .select_only()
        .column(batch::Column::CourseId)
        .into_tuple()
        .one(db)
        .await?;
    course_id
        .map(Some)
        .ok_or_else(|| EngineError::NotFound("Project not found".into()))
}

/// Move a challenge between statuses if it is still in one of `from`. Returns whether this
/// call made the transition.
pub(crate) async fn transition_challenge<C: ConnectionTrait>(
    db: &C,
    challenge_id: i32,
    from: &[ChallengeStatus],
    to: ChallengeStatus,
) -> Result<bool> {
    let from: Vec<ChallengeStatus> = from
        .iter()
        .copied()
        .filter(|s| s.can_transition_to(to))
        .collect();
    if from.is_empty() {
        return Ok(false);
    }
    let result = challenge::Entity::update_many()
        .col_expr(challenge::Column::Status, Expr::value(to))
        .col_expr(challenge::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(challenge::Column::Id.eq(challenge_id))
        .filter(challenge::Column::IsDeleted.eq(false))
        .filter(challenge::Column::Status.is_in(from))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Participants of a challenge in any of `statuses`.
pub(crate) async fn participants_in<C: ConnectionTrait>(
    db: &C,
    challenge_id: i32,
    statuses: &[ParticipantStatus],
) -> Result<Vec<challenge_participant::Model>> {
    Ok(challenge_participant::Entity::find()
        .filter(challenge_participant::Column::ChallengeId.eq(challenge_id))
        .filter(challenge_participant::Column::Status.is_in(statuses.iter().copied()))
        .order_by_asc(challenge_participant::Column::JoinedAt)
        .all(db)
        .await?)
}

#[instrument(skip(state, payload), fields(name = %payload.name))]
pub async fn create_challenge(
    state: &EngineState,
    creator_id: i32,
    payload: NewChallenge,
) -> Result<challenge::Model> {
    payload.validate()?;
    if let Some(course_id) = payload.course_id {
        find_course(&state.db, course_id).await?;
    }
    if let Some(project_id) = payload.project_id {
        find_project(&state.db, project_id).await?;
    }

    let now = Utc::now();
    let model = challenge::ActiveModel {
        name: Set(payload.name.trim().to_string()),
        description: Set(payload.description),
        challenge_type: Set(payload.challenge_type),
        status: Set(ChallengeStatus::Draft),
        course_id: Set(payload.course_id),
        project_id: Set(payload.project_id),
        group_id: Set(payload.group_id),
        sector_id: Set(payload.sector_id),
        start_date: Set(payload.start_date),
        end_date: Set(payload.end_date),
        criteria: Set(payload.criteria),
        rewards: Set(payload.rewards),
        max_participants: Set(payload.max_participants),
        creator_id: Set(creator_id),
        is_public: Set(payload.is_public),
        is_deleted: Set(false),
        deleted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(challenge_id = model.id, creator_id, "Created challenge");
    Ok(model)
}
