//! Badge Engine: eligibility against metric snapshots, and immutable awards.

use std::collections::HashSet;

use chrono::Utc;
use common::{BadgeRef, CriteriaSet, Evaluation};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::entity::{badge, user_badge};
use crate::error::{EngineError, Result};
use crate::metrics::load_snapshot;
use crate::notify::NotificationEvent;
use crate::state::EngineState;
use crate::users::find_user;

#[derive(Debug, Clone, Deserialize)]
pub struct NewBadge {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub rarity: String,
    pub criteria: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BadgeEligibility {
    pub badge_id: i32,
    #[serde(flatten)]
    pub evaluation: Evaluation,
    pub already_earned: bool,
}

pub async fn find_badge<C: ConnectionTrait>(db: &C, id: i32) -> Result<badge::Model> {
    badge::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Badge not found".into()))
}

/// Resolve a reward reference by id or unique name.
pub async fn resolve_badge<C: ConnectionTrait>(
    db: &C,
    reference: &BadgeRef,
) -> Result<Option<badge::Model>> {
    let found = match reference {
        BadgeRef::Id(id) => badge::Entity::find_by_id(*id).one(db).await?,
        BadgeRef::Name(name) => {
            badge::Entity::find()
                .filter(badge::Column::Name.eq(name.as_str()))
                .one(db)
                .await?
        }
    };
    Ok(found)
}

#[instrument(skip(state, payload), fields(name = %payload.name))]
pub async fn create_badge(state: &EngineState, payload: NewBadge) -> Result<badge::Model> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("Badge name must not be empty".into()));
    }
    CriteriaSet::from_json(&payload.criteria)?;

    let model = badge::ActiveModel {
        name: Set(name.to_string()),
        description: Set(payload.description),
        category: Set(payload.category),
        rarity: Set(payload.rarity),
        criteria: Set(payload.criteria),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&state.db)
    .await
    .map_err(|e| EngineError::from_insert(e, "A badge with this name already exists"))?;

    info!(badge_id = model.id, "Created badge");
    Ok(model)
}

async fn has_badge<C: ConnectionTrait>(db: &C, user_id: i32, badge_id: i32) -> Result<bool> {
    Ok(user_badge::Entity::find()
        .filter(user_badge::Column::UserId.eq(user_id))
        .filter(user_badge::Column::BadgeId.eq(badge_id))
        .one(db)
        .await?
        .is_some())
}

/// Evaluate one badge for a user without awarding it.
pub async fn check_badge_eligibility(
    state: &EngineState,
    user_id: i32,
    badge_id: i32,
) -> Result<BadgeEligibility> {
    find_user(&state.db, user_id).await?;
    let badge = find_badge(&state.db, badge_id).await?;
    let criteria = CriteriaSet::from_json(&badge.criteria)?;
    let snapshot = load_snapshot(&state.db, user_id).await?;

    Ok(BadgeEligibility {
        badge_id,
        evaluation: criteria.evaluate(&snapshot),
        already_earned: has_badge(&state.db, user_id, badge_id).await?,
    })
}

async fn insert_award(
    state: &EngineState,
    user_id: i32,
    badge: &badge::Model,
    progress: serde_json::Value,
) -> Result<user_badge::Model> {
    let award = user_badge::ActiveModel {
        user_id: Set(user_id),
        badge_id: Set(badge.id),
        earned_at: Set(Utc::now()),
        progress: Set(progress),
        ..Default::default()
    }
    .insert(&state.db)
    .await
    .map_err(|e| EngineError::from_insert(e, "Badge already earned"))?;

    info!(user_id, badge_id = badge.id, "Awarded badge");
    state
        .notify(
            user_id,
            NotificationEvent::BadgeEarned,
            json!({ "badge_id": badge.id, "name": badge.name }),
        )
        .await;
    Ok(award)
}

fn progress_document(badge: &badge::Model, snapshot: &common::MetricSnapshot) -> serde_json::Value {
    match CriteriaSet::from_json(&badge.criteria) {
        Ok(criteria) => serde_json::to_value(criteria.evaluate(snapshot)).unwrap_or_default(),
        Err(_) => json!({}),
    }
}

/// Award a badge outright, regardless of its criteria. A second award is a `Conflict`.
#[instrument(skip(state))]
pub async fn award_badge(
    state: &EngineState,
    user_id: i32,
    badge_id: i32,
) -> Result<user_badge::Model> {
    find_user(&state.db, user_id).await?;
    let badge = find_badge(&state.db, badge_id).await?;
    if has_badge(&state.db, user_id, badge_id).await? {
        return Err(EngineError::Conflict("Badge already earned".into()));
    }
    let snapshot = load_snapshot(&state.db, user_id).await?;
    insert_award(state, user_id, &badge, progress_document(&badge, &snapshot)).await
}

/// Award every badge the user is newly eligible for. Returns the new awards.
#[instrument(skip(state))]
pub async fn check_and_award_badges(
    state: &EngineState,
    user_id: i32,
) -> Result<Vec<user_badge::Model>> {
    let snapshot = load_snapshot(&state.db, user_id).await?;
    let earned: HashSet<i32> = user_badge::Entity::find()
        .filter(user_badge::Column::UserId.eq(user_id))
        .select_only()
        .column(user_badge::Column::BadgeId)
        .into_tuple()
        .all(&state.db)
        .await?
        .into_iter()
        .collect();

    let badges = badge::Entity::find()
        .order_by_asc(badge::Column::Id)
        .all(&state.db)
        .await?;

    let mut awarded = Vec::new();
    for badge in badges.iter().filter(|b| !earned.contains(&b.id)) {
        let criteria = match CriteriaSet::from_json(&badge.criteria) {
            Ok(criteria) => criteria,
            Err(e) => {
                warn!(badge_id = badge.id, error = %e, "Skipping badge with malformed criteria");
                continue;
            }
        };
        let evaluation = criteria.evaluate(&snapshot);
        if !evaluation.eligible {
            continue;
        }

        let progress = serde_json::to_value(evaluation).unwrap_or_default();
        match insert_award(state, user_id, badge, progress).await {
            Ok(award) => awarded.push(award),
            Err(EngineError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(awarded)
}
