//! External phase: boards, repositories and issues for a committed clone.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{join_all, try_join_all};
use futures::{StreamExt, TryStreamExt, stream};
use sea_orm::prelude::Expr;
use sea_orm::*;
use tracing::{debug, warn};

use super::plan::{ClonePlan, ProjectPlan};
use super::{ClonePhase, Progress};
use crate::entity::{batch, course, project, step};
use crate::error::Result;
use crate::provisioning::repository_name;
use crate::state::EngineState;

/// One attempt at provisioning every external resource of `plan`.
///
/// Boards are created all at once, projects at most `max_concurrent_projects` at a time,
/// and the issues of a project all at once. Every created repository id is pushed to
/// `created` so a later rollback can find it.
pub(crate) async fn provision(
    state: &EngineState,
    token: &str,
    plan: &ClonePlan,
    created: &Mutex<Vec<String>>,
    progress: &Progress<'_>,
) -> Result<()> {
    let provisioner = state.provisioner.as_ref();
    let db = &state.db;

    let batch_total = plan.batches.len();
    let boards_done = AtomicUsize::new(0);
    let boards: HashMap<i32, String> = try_join_all(plan.batches.iter().map(|b| {
        let boards_done = &boards_done;
        async move {
            let title = format!("{} - {}", plan.title, b.title);
            let board_id = provisioner.create_board(token, &title).await?;
            batch::Entity::update_many()
                .col_expr(batch::Column::BoardId, Expr::value(Some(board_id.clone())))
                .filter(batch::Column::Id.eq(b.batch_id))
                .exec(db)
                .await?;

            let done = boards_done.fetch_add(1, Ordering::SeqCst) + 1;
            progress.report(
                ClonePhase::Boards,
                format!("Created board for {}", b.title),
                done,
                batch_total,
            );
            Ok::<_, crate::error::EngineError>((b.batch_id, board_id))
        }
    }))
    .await?
    .into_iter()
    .collect();

    let tasks: Vec<(&str, &ProjectPlan)> = plan
        .batches
        .iter()
        .flat_map(|b| {
            let board_id = boards.get(&b.batch_id).map(String::as_str).unwrap_or_default();
            b.projects
                .iter()
                .filter(|p| p.provision)
                .map(move |p| (board_id, p))
        })
        .collect();

    let project_total = tasks.len();
    let projects_done = AtomicUsize::new(0);
    let limit = Ord::max(state.config.replication.max_concurrent_projects, 1);

    stream::iter(tasks)
        .map(|(board_id, project)| {
            let projects_done = &projects_done;
            async move {
                provision_project(state, token, board_id, project, created, progress).await?;
                let done = projects_done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(
                    ClonePhase::Repositories,
                    format!("Provisioned {}", project.title),
                    done,
                    project_total,
                );
                Ok::<_, crate::error::EngineError>(())
            }
        })
        .buffer_unordered(limit)
        .try_collect::<Vec<()>>()
        .await?;

    Ok(())
}

async fn provision_project(
    state: &EngineState,
    token: &str,
    board_id: &str,
    project: &ProjectPlan,
    created: &Mutex<Vec<String>>,
    progress: &Progress<'_>,
) -> Result<()> {
    let provisioner = state.provisioner.as_ref();
    let db = &state.db;

    let repo_id = provisioner
        .create_repository(
            token,
            &repository_name(&project.title, project.project_id),
            &project.description,
        )
        .await?;
    if let Ok(mut repos) = created.lock() {
        repos.push(repo_id.clone());
    }
    project::Entity::update_many()
        .col_expr(project::Column::RepoId, Expr::value(Some(repo_id.clone())))
        .filter(project::Column::Id.eq(project.project_id))
        .exec(db)
        .await?;

    let step_total = project.steps.len();
    let steps_done = AtomicUsize::new(0);
    try_join_all(project.steps.iter().map(|s| {
        let repo_id = repo_id.as_str();
        let steps_done = &steps_done;
        async move {
            let issue = provisioner
                .create_issue(token, board_id, repo_id, &s.title, &s.description)
                .await?;
            step::Entity::update_many()
                .col_expr(step::Column::IssueId, Expr::value(Some(issue.issue_id)))
                .col_expr(step::Column::ItemId, Expr::value(Some(issue.item_id)))
                .filter(step::Column::Id.eq(s.step_id))
                .exec(db)
                .await?;

            let done = steps_done.fetch_add(1, Ordering::SeqCst) + 1;
            progress.report(
                ClonePhase::Issues,
                format!("Created issue {} of {} for {}", done, step_total, project.title),
                done,
                step_total,
            );
            Ok::<_, crate::error::EngineError>(())
        }
    }))
    .await?;

    debug!(project_id = project.project_id, %repo_id, "Provisioned project");
    Ok(())
}

/// Compensate a failed external phase: delete every created repository (unordered, failures
/// logged), then soft-delete the clone so normal queries no longer reach it.
pub(crate) async fn roll_back(
    state: &EngineState,
    token: &str,
    course_id: i32,
    created: Vec<String>,
    progress: &Progress<'_>,
) {
    let total = created.len();
    let provisioner = state.provisioner.as_ref();

    let results = join_all(created.iter().map(|repo_id| async move {
        (repo_id, provisioner.delete_repository(token, repo_id).await)
    }))
    .await;

    let mut deleted = 0;
    for (repo_id, result) in results {
        match result {
            Ok(()) => deleted += 1,
            Err(e) => warn!(course_id, %repo_id, error = %e, "Failed to delete repository during rollback"),
        }
    }
    progress.report(
        ClonePhase::RollingBack,
        format!("Deleted {deleted} of {total} repositories"),
        deleted,
        total,
    );

    let now = chrono::Utc::now();
    if let Err(e) = course::Entity::update_many()
        .col_expr(course::Column::IsDeleted, Expr::value(true))
        .col_expr(course::Column::DeletedAt, Expr::value(Some(now)))
        .col_expr(course::Column::UpdatedAt, Expr::value(now))
        .filter(course::Column::Id.eq(course_id))
        .exec(&state.db)
        .await
    {
        tracing::error!(course_id, error = %e, "Failed to soft-delete clone during rollback");
    }
}
