//! Access Grant Store: per-(user, course) access tiers.
//!
//! Ownership is implicit and never stored. `SYNC_COPY` is only ever produced by
//! [`AccessGrants::ensure_sync_copy_access`] and only ever removed by
//! [`AccessGrants::downgrade_sync_copy_to_copy`], or by [`AccessGrants::revert_sync_copy`]
//! when the join that produced it is abandoned. Tier changes are conditional updates so a
//! concurrent join and leave on the same pair cannot lose an update.

use chrono::Utc;
use common::AccessTier;
use sea_orm::prelude::{DateTimeUtc, Expr};
use sea_orm::*;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::courses::find_course;
use crate::entity::access_grant;
use crate::error::{EngineError, Result};
use crate::notify::NotificationEvent;
use crate::state::EngineState;

/// Effective access of a user on a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tier", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    Owner,
    Granted(AccessTier),
}

impl AccessLevel {
    pub fn can_clone(&self) -> bool {
        match self {
            AccessLevel::Owner => true,
            AccessLevel::Granted(tier) => tier.can_clone(),
        }
    }
}

pub struct AccessGrants<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AccessGrants<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Row for the pair, including a soft-deleted one.
    async fn find_row(&self, course_id: i32, user_id: i32) -> Result<Option<access_grant::Model>> {
        Ok(access_grant::Entity::find()
            .filter(access_grant::Column::CourseId.eq(course_id))
            .filter(access_grant::Column::UserId.eq(user_id))
            .one(self.conn)
            .await?)
    }

    async fn active_row(&self, course_id: i32, user_id: i32) -> Result<access_grant::Model> {
        self.find_row(course_id, user_id)
            .await?
            .filter(|row| !row.is_deleted)
            .ok_or_else(|| EngineError::Internal("Access grant vanished after write".into()))
    }

    async fn insert_row(&self, course_id: i32, user_id: i32, tier: AccessTier) -> Result<bool> {
        let now = Utc::now();
        let model = access_grant::ActiveModel {
            course_id: Set(course_id),
            user_id: Set(user_id),
            tier: Set(tier),
            is_deleted: Set(false),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        match model.insert(self.conn).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bring a soft-deleted row back with the given tier. No-op on a live row.
    async fn restore(&self, course_id: i32, user_id: i32, tier: AccessTier) -> Result<u64> {
        let now = Utc::now();
        let result = access_grant::Entity::update_many()
            .col_expr(access_grant::Column::Tier, Expr::value(tier))
            .col_expr(access_grant::Column::IsDeleted, Expr::value(false))
            .col_expr(
                access_grant::Column::DeletedAt,
                Expr::value(Option::<DateTimeUtc>::None),
            )
            .col_expr(access_grant::Column::UpdatedAt, Expr::value(now))
            .filter(access_grant::Column::CourseId.eq(course_id))
            .filter(access_grant::Column::UserId.eq(user_id))
            .filter(access_grant::Column::IsDeleted.eq(true))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Set `tier` on the live row if its current tier is one of `from`.
    async fn change_tier(
        &self,
        course_id: i32,
        user_id: i32,
        from: &[AccessTier],
        tier: AccessTier,
    ) -> Result<u64> {
        let result = access_grant::Entity::update_many()
            .col_expr(access_grant::Column::Tier, Expr::value(tier))
            .col_expr(access_grant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(access_grant::Column::CourseId.eq(course_id))
            .filter(access_grant::Column::UserId.eq(user_id))
            .filter(access_grant::Column::IsDeleted.eq(false))
            .filter(access_grant::Column::Tier.is_in(from.iter().copied()))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Effective access, or `None` when the user has no access at all.
    pub async fn check(&self, user_id: i32, course_id: i32) -> Result<Option<AccessLevel>> {
        let course = find_course(self.conn, course_id).await?;
        if course.owner_id == user_id {
            return Ok(Some(AccessLevel::Owner));
        }
        Ok(self
            .find_row(course_id, user_id)
            .await?
            .filter(|row| !row.is_deleted)
            .map(|row| AccessLevel::Granted(row.tier)))
    }

    /// Grant `READ_ONLY` or `COPY`. A live `SYNC_COPY` row is left as is.
    pub async fn grant(
        &self,
        course_id: i32,
        user_id: i32,
        tier: AccessTier,
    ) -> Result<access_grant::Model> {
        if tier == AccessTier::SyncCopy {
            return Err(EngineError::Forbidden(
                "SYNC_COPY access is reserved for challenge participation".into(),
            ));
        }
        let course = find_course(self.conn, course_id).await?;
        if course.owner_id == user_id {
            return Err(EngineError::Validation(
                "The course owner cannot be granted access".into(),
            ));
        }

        let inserted = match self.find_row(course_id, user_id).await? {
            None => self.insert_row(course_id, user_id, tier).await?,
            Some(_) => false,
        };
        if !inserted {
            self.restore(course_id, user_id, tier).await?;
            self.change_tier(
                course_id,
                user_id,
                &[AccessTier::ReadOnly, AccessTier::Copy],
                tier,
            )
            .await?;
        }

        self.active_row(course_id, user_id).await
    }

    /// Upgrade (or create) the pair's grant to `SYNC_COPY`. Never downgrades.
    /// Returns `None` for the owner, who needs no grant.
    pub async fn ensure_sync_copy_access(
        &self,
        course_id: i32,
        user_id: i32,
    ) -> Result<Option<access_grant::Model>> {
        let course = find_course(self.conn, course_id).await?;
        if course.owner_id == user_id {
            return Ok(None);
        }

        let inserted = match self.find_row(course_id, user_id).await? {
            None => self.insert_row(course_id, user_id, AccessTier::SyncCopy).await?,
            Some(_) => false,
        };
        if !inserted {
            self.restore(course_id, user_id, AccessTier::SyncCopy).await?;
            self.change_tier(
                course_id,
                user_id,
                &[AccessTier::ReadOnly, AccessTier::Copy],
                AccessTier::SyncCopy,
            )
            .await?;
        }

        self.active_row(course_id, user_id).await.map(Some)
    }

    /// `SYNC_COPY -> COPY`. No-op for any other tier or a missing grant; idempotent.
    /// Returns whether a row changed.
    pub async fn downgrade_sync_copy_to_copy(&self, course_id: i32, user_id: i32) -> Result<bool> {
        let changed = self
            .change_tier(
                course_id,
                user_id,
                &[AccessTier::SyncCopy],
                AccessTier::Copy,
            )
            .await?;
        Ok(changed > 0)
    }

    /// Undo an `ensure_sync_copy_access` that no participation ended up backing. `previous`
    /// is the level before the upgrade: a prior tier is put back, no prior grant means the
    /// grant is removed, and an owner or an existing `SYNC_COPY` is left alone.
    pub async fn revert_sync_copy(
        &self,
        course_id: i32,
        user_id: i32,
        previous: Option<AccessLevel>,
    ) -> Result<()> {
        match previous {
            Some(AccessLevel::Owner) | Some(AccessLevel::Granted(AccessTier::SyncCopy)) => {}
            Some(AccessLevel::Granted(tier)) => {
                self.change_tier(course_id, user_id, &[AccessTier::SyncCopy], tier)
                    .await?;
            }
            None => {
                self.remove(course_id, user_id).await?;
            }
        }
        Ok(())
    }

    /// Downgrade, then soft-delete the live grant. Returns whether a grant was removed.
    pub async fn remove(&self, course_id: i32, user_id: i32) -> Result<bool> {
        self.downgrade_sync_copy_to_copy(course_id, user_id).await?;
        let now = Utc::now();
        let result = access_grant::Entity::update_many()
            .col_expr(access_grant::Column::IsDeleted, Expr::value(true))
            .col_expr(access_grant::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(access_grant::Column::UpdatedAt, Expr::value(now))
            .filter(access_grant::Column::CourseId.eq(course_id))
            .filter(access_grant::Column::UserId.eq(user_id))
            .filter(access_grant::Column::IsDeleted.eq(false))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Soft-delete every live grant on a course. Returns how many were removed.
    pub async fn remove_all_for_course(&self, course_id: i32) -> Result<u64> {
        let now = Utc::now();
        let result = access_grant::Entity::update_many()
            .col_expr(access_grant::Column::Tier, Expr::value(AccessTier::Copy))
            .col_expr(access_grant::Column::IsDeleted, Expr::value(true))
            .col_expr(access_grant::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(access_grant::Column::UpdatedAt, Expr::value(now))
            .filter(access_grant::Column::CourseId.eq(course_id))
            .filter(access_grant::Column::IsDeleted.eq(false))
            .filter(access_grant::Column::Tier.eq(AccessTier::SyncCopy))
            .exec(self.conn)
            .await?
            .rows_affected;
        let rest = access_grant::Entity::update_many()
            .col_expr(access_grant::Column::IsDeleted, Expr::value(true))
            .col_expr(access_grant::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(access_grant::Column::UpdatedAt, Expr::value(now))
            .filter(access_grant::Column::CourseId.eq(course_id))
            .filter(access_grant::Column::IsDeleted.eq(false))
            .exec(self.conn)
            .await?
            .rows_affected;
        Ok(result + rest)
    }
}

/// Effective access of `user_id` on `course_id`.
pub async fn check_access(
    state: &EngineState,
    user_id: i32,
    course_id: i32,
) -> Result<Option<AccessLevel>> {
    AccessGrants::new(&state.db).check(user_id, course_id).await
}

/// Share a course. Only the owner may grant, and never `SYNC_COPY`.
#[instrument(skip(state))]
pub async fn grant_access(
    state: &EngineState,
    actor_id: i32,
    course_id: i32,
    grantee_id: i32,
    tier: AccessTier,
) -> Result<access_grant::Model> {
    require_owner(&state.db, actor_id, course_id).await?;
    let grant = AccessGrants::new(&state.db)
        .grant(course_id, grantee_id, tier)
        .await?;

    info!(course_id, grantee_id, tier = %grant.tier, "Granted course access");
    state
        .notify(
            grantee_id,
            NotificationEvent::CourseShared,
            json!({ "course_id": course_id, "tier": grant.tier }),
        )
        .await;
    Ok(grant)
}

/// Revoke a grant. `SYNC_COPY` is downgraded first so the removal path stays uniform.
#[instrument(skip(state))]
pub async fn remove_access(
    state: &EngineState,
    actor_id: i32,
    course_id: i32,
    grantee_id: i32,
) -> Result<()> {
    require_owner(&state.db, actor_id, course_id).await?;
    let removed = AccessGrants::new(&state.db)
        .remove(course_id, grantee_id)
        .await?;
    if !removed {
        return Err(EngineError::NotFound("Access grant not found".into()));
    }
    info!(course_id, grantee_id, "Removed course access");
    Ok(())
}

pub async fn downgrade_sync_to_copy(
    state: &EngineState,
    course_id: i32,
    user_id: i32,
) -> Result<bool> {
    AccessGrants::new(&state.db)
        .downgrade_sync_copy_to_copy(course_id, user_id)
        .await
}

async fn require_owner<C: ConnectionTrait>(db: &C, actor_id: i32, course_id: i32) -> Result<()> {
    let course = find_course(db, course_id).await?;
    if course.owner_id != actor_id {
        return Err(EngineError::Forbidden(
            "Only the course owner can manage access".into(),
        ));
    }
    Ok(())
}
