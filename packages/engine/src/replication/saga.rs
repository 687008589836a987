//! Persistent trace of a clone. Bookkeeping failures are logged and never fail the clone.

use chrono::Utc;
use common::SagaPhase;
use sea_orm::prelude::Expr;
use sea_orm::*;
use tracing::warn;
use uuid::Uuid;

use super::CloneSource;
use crate::entity::clone_saga;

pub(crate) struct SagaRecord<'a> {
    db: &'a DatabaseConnection,
    id: Uuid,
    stored: bool,
}

impl<'a> SagaRecord<'a> {
    pub async fn start(
        db: &'a DatabaseConnection,
        grantee_id: i32,
        source_course_id: i32,
        source: CloneSource,
    ) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let source_project_id = match source {
            CloneSource::Course(_) => None,
            CloneSource::Project(project_id) => Some(project_id),
        };
        let record = clone_saga::ActiveModel {
            id: Set(id),
            grantee_id: Set(grantee_id),
            source_course_id: Set(source_course_id),
            source_project_id: Set(source_project_id),
            course_id: Set(None),
            phase: Set(SagaPhase::Local),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let stored = match record.insert(db).await {
            Ok(_) => true,
            Err(e) => {
                warn!(saga_id = %id, error = %e, "Failed to record clone saga");
                false
            }
        };
        Self { db, id, stored }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn advance(&self, phase: SagaPhase) {
        self.update(phase, None, None, None).await;
    }

    pub async fn committed_locally(&self, course_id: i32, phase: SagaPhase) {
        self.update(phase, Some(course_id), None, None).await;
    }

    pub async fn attempted(&self, attempts: i32, error: Option<&str>) {
        self.update(SagaPhase::Provisioning, None, Some(attempts), error)
            .await;
    }

    pub async fn fail(&self, phase: SagaPhase, error: &str) {
        self.update(phase, None, None, Some(error)).await;
    }

    async fn update(
        &self,
        phase: SagaPhase,
        course_id: Option<i32>,
        attempts: Option<i32>,
        error: Option<&str>,
    ) {
        if !self.stored {
            return;
        }

        let mut update = clone_saga::Entity::update_many()
            .col_expr(clone_saga::Column::Phase, Expr::value(phase))
            .col_expr(clone_saga::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(course_id) = course_id {
            update = update.col_expr(clone_saga::Column::CourseId, Expr::value(Some(course_id)));
        }
        if let Some(attempts) = attempts {
            update = update.col_expr(clone_saga::Column::Attempts, Expr::value(attempts));
        }
        if let Some(error) = error {
            update = update.col_expr(
                clone_saga::Column::LastError,
                Expr::value(Some(error.to_string())),
            );
        }

        if let Err(e) = update
            .filter(clone_saga::Column::Id.eq(self.id))
            .exec(self.db)
            .await
        {
            warn!(saga_id = %self.id, phase = %phase, error = %e, "Failed to update clone saga");
        }
    }
}
