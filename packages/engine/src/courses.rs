use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::*;
use tracing::{info, instrument};

use crate::access::AccessGrants;
use crate::entity::{batch, course, project};
use crate::error::{EngineError, Result};
use crate::state::EngineState;

/// Look up a live (not soft-deleted) course, returning `NotFound` otherwise.
pub async fn find_course<C: ConnectionTrait>(db: &C, id: i32) -> Result<course::Model> {
    course::Entity::find_by_id(id)
        .filter(course::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Course not found".into()))
}

/// Look up a project whose course is live.
pub async fn find_project<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<(project::Model, batch::Model, course::Model)> {
    let project = project::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Project not found".into()))?;
    let batch = batch::Entity::find_by_id(project.batch_id)
        .one(db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Project not found".into()))?;
    let course = find_course(db, batch.course_id)
        .await
        .map_err(|_| EngineError::NotFound("Project not found".into()))?;
    Ok((project, batch, course))
}

/// Batch and project ids of a course, batches by sequence and projects by position.
pub async fn course_project_ids<C: ConnectionTrait>(db: &C, course_id: i32) -> Result<Vec<i32>> {
    let batch_ids: Vec<i32> = batch::Entity::find()
        .filter(batch::Column::CourseId.eq(course_id))
        .select_only()
        .column(batch::Column::Id)
        .into_tuple()
        .all(db)
        .await?;
    if batch_ids.is_empty() {
        return Ok(Vec::new());
    }

    let ids = project::Entity::find()
        .filter(project::Column::BatchId.is_in(batch_ids))
        .order_by_asc(project::Column::BatchId)
        .order_by_asc(project::Column::Position)
        .select_only()
        .column(project::Column::Id)
        .into_tuple()
        .all(db)
        .await?;
    Ok(ids)
}

/// Soft-delete a course and every access grant on it. Clones keep their provenance.
#[instrument(skip(state))]
pub async fn delete_course(state: &EngineState, actor_id: i32, course_id: i32) -> Result<()> {
    let txn = state.db.begin().await?;
    let course = find_course(&txn, course_id).await?;
    if course.owner_id != actor_id {
        return Err(EngineError::Forbidden(
            "Only the owner can delete a course".into(),
        ));
    }

    let now = Utc::now();
    let revoked = AccessGrants::new(&txn).remove_all_for_course(course_id).await?;
    course::Entity::update_many()
        .col_expr(course::Column::IsDeleted, Expr::value(true))
        .col_expr(course::Column::DeletedAt, Expr::value(Some(now)))
        .col_expr(course::Column::UpdatedAt, Expr::value(now))
        .filter(course::Column::Id.eq(course_id))
        .filter(course::Column::IsDeleted.eq(false))
        .exec(&txn)
        .await?;

    txn.commit().await?;
    info!(course_id, revoked, "Soft-deleted course");
    Ok(())
}
