//! Local phase: copy a course tree into the grantee's namespace inside one transaction.

use std::collections::HashMap;

use chrono::Utc;
use common::{ProjectStatus, StepStatus};
use sea_orm::*;

use super::CloneSource;
use crate::courses::{find_course, find_project};
use crate::entity::{batch, course, project, step};
use crate::error::Result;

/// The freshly written clone, with what the external phase has to provision.
#[derive(Debug, Clone)]
pub(crate) struct ClonePlan {
    pub course_id: i32,
    pub title: String,
    pub batches: Vec<BatchPlan>,
}

#[derive(Debug, Clone)]
pub(crate) struct BatchPlan {
    pub batch_id: i32,
    pub title: String,
    pub projects: Vec<ProjectPlan>,
}

#[derive(Debug, Clone)]
pub(crate) struct ProjectPlan {
    pub project_id: i32,
    pub title: String,
    pub description: String,
    /// The source project had been started, so the clone gets a repository and issues.
    pub provision: bool,
    pub steps: Vec<StepPlan>,
}

#[derive(Debug, Clone)]
pub(crate) struct StepPlan {
    pub step_id: i32,
    pub title: String,
    pub description: String,
}

impl ClonePlan {
    pub fn provisioned_projects(&self) -> usize {
        self.batches
            .iter()
            .flat_map(|b| &b.projects)
            .filter(|p| p.provision)
            .count()
    }
}

/// The grantee's live clone of `source`, if one exists.
pub(crate) async fn find_existing_clone<C: ConnectionTrait>(
    db: &C,
    owner_id: i32,
    source: CloneSource,
) -> Result<Option<i32>> {
    let mut query = course::Entity::find()
        .filter(course::Column::OwnerId.eq(owner_id))
        .filter(course::Column::IsDeleted.eq(false));
    query = match source {
        CloneSource::Course(id) => query
            .filter(course::Column::SourceCourseId.eq(id))
            .filter(course::Column::SourceProjectId.is_null()),
        CloneSource::Project(id) => query.filter(course::Column::SourceProjectId.eq(id)),
    };
    Ok(query.one(db).await?.map(|c| c.id))
}

/// Source rows of one batch with its projects and their steps.
struct SourceBatch {
    batch: batch::Model,
    projects: Vec<(project::Model, Vec<step::Model>)>,
}

async fn load_steps<C: ConnectionTrait>(
    db: &C,
    project_ids: Vec<i32>,
) -> Result<HashMap<i32, Vec<step::Model>>> {
    let mut by_project: HashMap<i32, Vec<step::Model>> = HashMap::new();
    if project_ids.is_empty() {
        return Ok(by_project);
    }
    let steps = step::Entity::find()
        .filter(step::Column::ProjectId.is_in(project_ids))
        .order_by_asc(step::Column::Position)
        .all(db)
        .await?;
    for s in steps {
        by_project.entry(s.project_id).or_default().push(s);
    }
    Ok(by_project)
}

async fn load_course_tree<C: ConnectionTrait>(db: &C, course_id: i32) -> Result<Vec<SourceBatch>> {
    let batches = batch::Entity::find()
        .filter(batch::Column::CourseId.eq(course_id))
        .order_by_asc(batch::Column::Sequence)
        .all(db)
        .await?;
    if batches.is_empty() {
        return Ok(Vec::new());
    }

    let projects = project::Entity::find()
        .filter(project::Column::BatchId.is_in(batches.iter().map(|b| b.id)))
        .order_by_asc(project::Column::Position)
        .all(db)
        .await?;
    let mut steps = load_steps(db, projects.iter().map(|p| p.id).collect()).await?;

    let mut by_batch: HashMap<i32, Vec<(project::Model, Vec<step::Model>)>> = HashMap::new();
    for p in projects {
        let project_steps = steps.remove(&p.id).unwrap_or_default();
        by_batch.entry(p.batch_id).or_default().push((p, project_steps));
    }

    Ok(batches
        .into_iter()
        .map(|batch| SourceBatch {
            projects: by_batch.remove(&batch.id).unwrap_or_default(),
            batch,
        })
        .collect())
}

/// Write the clone of `source` owned by `owner_id`. Cloned projects start over:
/// status `not started`, no score, no repository, steps `todo` without external ids.
pub(crate) async fn copy_tree(
    txn: &DatabaseTransaction,
    owner_id: i32,
    source: CloneSource,
) -> Result<ClonePlan> {
    let (source_course, source_project_id, tree) = match source {
        CloneSource::Course(id) => {
            let course = find_course(txn, id).await?;
            let tree = load_course_tree(txn, id).await?;
            (course, None, tree)
        }
        CloneSource::Project(id) => {
            let (project, batch, course) = find_project(txn, id).await?;
            let mut steps = load_steps(txn, vec![project.id]).await?;
            let project_steps = steps.remove(&project.id).unwrap_or_default();
            let tree = vec![SourceBatch {
                batch,
                projects: vec![(project, project_steps)],
            }];
            (course, Some(id), tree)
        }
    };

    let (title, description) = match (source_project_id, tree.first()) {
        (Some(_), Some(only)) => match only.projects.first() {
            Some((p, _)) => (p.title.clone(), p.description.clone()),
            None => (source_course.title.clone(), source_course.description.clone()),
        },
        _ => (source_course.title.clone(), source_course.description.clone()),
    };

    let now = Utc::now();
    let cloned_course = course::ActiveModel {
        title: Set(title.clone()),
        description: Set(description),
        status: Set(source_course.status.clone()),
        owner_id: Set(owner_id),
        source_course_id: Set(Some(source_course.id)),
        source_project_id: Set(source_project_id),
        is_deleted: Set(false),
        deleted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await?;

    let mut batches = Vec::with_capacity(tree.len());
    for source_batch in tree {
        let sequence = match source_project_id {
            Some(_) => 1,
            None => source_batch.batch.sequence,
        };
        let cloned_batch = batch::ActiveModel {
            course_id: Set(cloned_course.id),
            sequence: Set(sequence),
            title: Set(source_batch.batch.title.clone()),
            status: Set(source_batch.batch.status.clone()),
            board_id: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        let mut projects = Vec::with_capacity(source_batch.projects.len());
        for (source_project, source_steps) in source_batch.projects {
            let cloned_project = project::ActiveModel {
                batch_id: Set(cloned_batch.id),
                title: Set(source_project.title.clone()),
                description: Set(source_project.description.clone()),
                level: Set(source_project.level.clone()),
                status: Set(ProjectStatus::NotStarted),
                position: Set(source_project.position),
                objectives: Set(source_project.objectives.clone()),
                evaluation_score: Set(None),
                repo_id: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(txn)
            .await?;

            let mut steps = Vec::with_capacity(source_steps.len());
            for source_step in source_steps {
                let cloned_step = step::ActiveModel {
                    project_id: Set(cloned_project.id),
                    position: Set(source_step.position),
                    title: Set(source_step.title.clone()),
                    description: Set(source_step.description.clone()),
                    status: Set(StepStatus::Todo),
                    issue_id: Set(None),
                    item_id: Set(None),
                    ..Default::default()
                }
                .insert(txn)
                .await?;
                steps.push(StepPlan {
                    step_id: cloned_step.id,
                    title: source_step.title,
                    description: source_step.description,
                });
            }

            projects.push(ProjectPlan {
                project_id: cloned_project.id,
                title: source_project.title,
                description: source_project.description,
                provision: source_project.status != ProjectStatus::NotStarted,
                steps,
            });
        }

        batches.push(BatchPlan {
            batch_id: cloned_batch.id,
            title: source_batch.batch.title,
            projects,
        });
    }

    Ok(ClonePlan {
        course_id: cloned_course.id,
        title,
        batches,
    })
}
