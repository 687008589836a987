//! Replication Engine: deep-clones a course (or a single project) into a new owner's
//! namespace, then provisions matching external resources as a compensable saga.
//!
//! 1. Local phase: the whole tree is written in one transaction. Nothing persists on failure.
//! 2. External phase: outside any transaction. Retried once after a fixed backoff.
//! 3. Compensation: created repositories are deleted best-effort and the clone is soft-deleted.

mod plan;
mod provision;
mod saga;

use std::sync::Mutex;
use std::time::Duration;

use common::SagaPhase;
use sea_orm::*;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::access::AccessGrants;
use crate::config::ReplicationConfig;
use crate::courses::{find_course, find_project};
use crate::entity::user;
use crate::error::{EngineError, Result};
use crate::notify::NotificationEvent;
use crate::state::EngineState;
use crate::users::find_user;

pub(crate) use plan::find_existing_clone;
use saga::SagaRecord;

/// What gets cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneSource {
    Course(i32),
    /// A single project, cloned into a one-batch course of its own.
    Project(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneOptions {
    pub provision_external: bool,
    pub retry_on_failure: bool,
}

impl CloneOptions {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            provision_external: true,
            retry_on_failure: config.retry_on_failure,
        }
    }

    /// Options for clones made on a user's behalf by a join or an accepted invite:
    /// provision only when enabled and the user has linked an external account.
    pub fn for_user(config: &ReplicationConfig, user: &user::Model) -> Self {
        Self {
            provision_external: config.provision_on_join && user.provider_token.is_some(),
            retry_on_failure: config.retry_on_failure,
        }
    }

    pub fn local_only() -> Self {
        Self {
            provision_external: false,
            retry_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClonePhase {
    Boards,
    Repositories,
    Issues,
    RollingBack,
    Done,
}

/// Live status of a running clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneProgress {
    pub phase: ClonePhase,
    pub message: String,
    pub completed: usize,
    pub total: usize,
}

/// Progress callback. It may borrow from the caller for the duration of the clone.
pub type ProgressFn<'a> = dyn Fn(CloneProgress) + Send + Sync + 'a;

/// Optional progress callback.
pub(crate) struct Progress<'a>(Option<&'a ProgressFn<'a>>);

impl Progress<'_> {
    pub fn report(&self, phase: ClonePhase, message: String, completed: usize, total: usize) {
        if let Some(callback) = self.0 {
            callback(CloneProgress {
                phase,
                message,
                completed,
                total,
            });
        }
    }
}

/// Clone a course the grantee owns or holds `COPY`/`SYNC_COPY` access on.
/// Returns the existing clone if the grantee already has a live one.
#[instrument(skip(state, progress))]
pub async fn clone_course(
    state: &EngineState,
    grantee_id: i32,
    source_course_id: i32,
    options: CloneOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<i32> {
    require_clone_access(state, grantee_id, source_course_id).await?;
    replicate(
        state,
        grantee_id,
        CloneSource::Course(source_course_id),
        options,
        progress,
    )
    .await
}

/// Clone a single project into a course of its own.
#[instrument(skip(state, progress))]
pub async fn clone_project(
    state: &EngineState,
    grantee_id: i32,
    project_id: i32,
    options: CloneOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<i32> {
    let (_, _, course) = find_project(&state.db, project_id).await?;
    require_clone_access(state, grantee_id, course.id).await?;
    replicate(
        state,
        grantee_id,
        CloneSource::Project(project_id),
        options,
        progress,
    )
    .await
}

async fn require_clone_access(state: &EngineState, user_id: i32, course_id: i32) -> Result<()> {
    let level = AccessGrants::new(&state.db).check(user_id, course_id).await?;
    match level {
        Some(level) if level.can_clone() => Ok(()),
        _ => Err(EngineError::Forbidden(
            "Copy access is required to clone this course".into(),
        )),
    }
}

/// Run the clone saga without an access check. Callers authorize.
pub(crate) async fn replicate(
    state: &EngineState,
    grantee_id: i32,
    source: CloneSource,
    options: CloneOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<i32> {
    let progress = Progress(progress);
    let grantee = find_user(&state.db, grantee_id).await?;
    let token = match (options.provision_external, grantee.provider_token) {
        (true, Some(token)) => Some(token),
        (true, None) => {
            return Err(EngineError::Validation(
                "Link an external account before cloning with provisioning".into(),
            ));
        }
        (false, _) => None,
    };

    let source_course_id = match source {
        CloneSource::Course(id) => find_course(&state.db, id).await?.id,
        CloneSource::Project(id) => find_project(&state.db, id).await?.2.id,
    };

    if let Some(existing) = find_existing_clone(&state.db, grantee_id, source).await? {
        info!(grantee_id, course_id = existing, "Clone already exists");
        return Ok(existing);
    }

    let saga = SagaRecord::start(&state.db, grantee_id, source_course_id, source).await;

    let plan = match copy_locally(state, grantee_id, source).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            saga.fail(SagaPhase::Failed, "Clone already exists").await;
            return find_existing_clone(&state.db, grantee_id, source)
                .await?
                .ok_or_else(|| EngineError::Conflict("Clone was removed concurrently".into()));
        }
        Err(e) => {
            saga.fail(SagaPhase::Failed, &e.to_string()).await;
            return Err(e);
        }
    };
    let course_id = plan.course_id;

    let Some(token) = token else {
        saga.committed_locally(course_id, SagaPhase::Committed).await;
        info!(grantee_id, course_id, saga_id = %saga.id(), "Cloned course");
        notify_ready(state, grantee_id, course_id).await;
        return Ok(course_id);
    };

    saga.committed_locally(course_id, SagaPhase::Provisioning).await;
    info!(
        grantee_id,
        course_id,
        saga_id = %saga.id(),
        projects = plan.provisioned_projects(),
        "Cloned course tree, provisioning external resources"
    );

    let created = Mutex::new(Vec::new());
    let mut result = provision::provision(state, &token, &plan, &created, &progress).await;
    saga.attempted(1, result.as_ref().err().map(|e| e.to_string()).as_deref())
        .await;

    if let Err(e) = &result
        && options.retry_on_failure
    {
        warn!(course_id, saga_id = %saga.id(), error = %e, "External provisioning failed, retrying");
        tokio::time::sleep(Duration::from_millis(state.config.replication.retry_backoff_ms)).await;
        result = provision::provision(state, &token, &plan, &created, &progress).await;
        saga.attempted(2, result.as_ref().err().map(|e| e.to_string()).as_deref())
            .await;
    }

    match result {
        Ok(()) => {
            saga.advance(SagaPhase::Committed).await;
            progress.report(ClonePhase::Done, "Clone ready".into(), 1, 1);
            info!(grantee_id, course_id, saga_id = %saga.id(), "Cloned course with external resources");
            notify_ready(state, grantee_id, course_id).await;
            Ok(course_id)
        }
        Err(e) => {
            tracing::error!(course_id, saga_id = %saga.id(), error = %e, "External provisioning failed, rolling back");
            saga.advance(SagaPhase::RollingBack).await;
            let created = created.into_inner().unwrap_or_else(|p| p.into_inner());
            provision::roll_back(state, &token, course_id, created, &progress).await;
            saga.fail(SagaPhase::RolledBack, &e.to_string()).await;

            state
                .notify(
                    grantee_id,
                    NotificationEvent::CloneFailed,
                    json!({ "source_course_id": source_course_id }),
                )
                .await;
            Err(EngineError::ExternalProvisioningFailed(
                "Could not create the external resources for this course. Please try again later."
                    .into(),
            ))
        }
    }
}

/// Write the tree in one transaction. `None` when a racing clone committed first.
async fn copy_locally(
    state: &EngineState,
    grantee_id: i32,
    source: CloneSource,
) -> Result<Option<plan::ClonePlan>> {
    let txn = state.db.begin().await?;
    if find_existing_clone(&txn, grantee_id, source).await?.is_some() {
        return Ok(None);
    }
    let plan = plan::copy_tree(&txn, grantee_id, source).await?;
    txn.commit().await?;
    Ok(Some(plan))
}

async fn notify_ready(state: &EngineState, grantee_id: i32, course_id: i32) {
    state
        .notify(
            grantee_id,
            NotificationEvent::CloneReady,
            json!({ "course_id": course_id }),
        )
        .await;
}
