use ::common::{AccessTier, ChallengeStatus, ParticipantStatus};
use chrono::Utc;
use sea_orm::EntityTrait;
use serde_json::json;

use engine::access::{AccessLevel, check_access, grant_access};
use engine::challenge::{
    activate_challenge, complete_challenge, create_challenge, delete_challenge, find_challenge,
    find_participant, join_challenge, leave_challenge, process_scheduled_transitions,
    update_participant_progress,
};
use engine::courses::{course_project_ids, delete_course};
use engine::entity::{challenge, user_stats};
use engine::error::EngineError;
use engine::notify::NotificationEvent;

use crate::common::{TestEngine, assert_status, hours_ago, new_challenge};

/// A course owner, their course and a draft challenge over its only project.
async fn setup_project(app: &TestEngine) -> (i32, i32, challenge::Model) {
    let owner = app.create_user("owner").await;
    let course = app.create_course_tree(owner.id, "Rust 101", 2).await;
    let project_id = course_project_ids(&app.db, course.id).await.unwrap()[0];
    let mut payload = new_challenge(course.id, json!({ "projectsCompleted": 5 }));
    payload.course_id = None;
    payload.project_id = Some(project_id);
    let challenge = create_challenge(&app.state, owner.id, payload).await.unwrap();
    (owner.id, course.id, challenge)
}

/// A course owner, their course and a draft challenge over it.
async fn setup(app: &TestEngine) -> (i32, i32, challenge::Model) {
    let owner = app.create_user("owner").await;
    let course = app.create_course_tree(owner.id, "Rust 101", 2).await;
    let challenge = app
        .create_challenge(owner.id, course.id, json!({ "projectsCompleted": 5 }))
        .await;
    (owner.id, course.id, challenge)
}

mod creation {
    use super::*;

    #[tokio::test]
    async fn starts_as_draft() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        assert_status(&challenge, ChallengeStatus::Draft);
        assert!(challenge.is_public);
    }

    #[tokio::test]
    async fn rejects_malformed_criteria() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let err = create_challenge(&app.state, owner.id, new_challenge(course.id, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_course() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;

        let err = create_challenge(
            &app.state,
            owner.id,
            new_challenge(999, json!({ "totalCommits": 10 })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}

mod joining {
    use super::*;

    #[tokio::test]
    async fn join_draft_clones_and_grants_sync_copy() {
        let app = TestEngine::spawn().await;
        let (_, course_id, challenge) = setup(&app).await;
        let student = app.create_user("student").await;

        let participant = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::Joined);
        assert_eq!(participant.progress, json!({}));

        let clone_id = participant.challenge_course_id.expect("participant clone");
        assert_ne!(clone_id, course_id);
        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::SyncCopy)));
        assert_eq!(app.provisioner.repositories().len(), 1);
        assert!(
            app.notifier
                .events_for(student.id)
                .contains(&NotificationEvent::ChallengeJoined)
        );
    }

    #[tokio::test]
    async fn join_active_starts_in_progress() {
        let app = TestEngine::spawn().await;
        let (owner_id, _, challenge) = setup(&app).await;
        activate_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();
        let student = app.create_user("student").await;

        let participant = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::InProgress);
    }

    #[tokio::test]
    async fn user_without_account_gets_local_clone() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        let student = app.create_user_without_token("student").await;

        let participant = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        assert!(participant.challenge_course_id.is_some());
        assert!(app.provisioner.repositories().is_empty());
    }

    #[tokio::test]
    async fn duplicate_join_conflicts() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        let err = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn private_challenge_needs_admission() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;
        let mut payload = new_challenge(course.id, json!({ "totalCommits": 10 }));
        payload.is_public = false;
        let challenge = create_challenge(&app.state, owner.id, payload).await.unwrap();
        let student = app.create_user("student").await;

        let err = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn full_challenge_rejects_joins() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;
        let mut payload = new_challenge(course.id, json!({ "totalCommits": 10 }));
        payload.max_participants = Some(1);
        let challenge = create_challenge(&app.state, owner.id, payload).await.unwrap();
        let first = app.create_user("first").await;
        let second = app.create_user("second").await;

        join_challenge(&app.state, first.id, challenge.id)
            .await
            .unwrap();
        let err = join_challenge(&app.state, second.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ref m) if m == "Challenge is full"));
    }

    #[tokio::test]
    async fn audience_is_enforced() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;
        let mut payload = new_challenge(course.id, json!({ "totalCommits": 10 }));
        payload.group_id = Some(7);
        let challenge = create_challenge(&app.state, owner.id, payload).await.unwrap();
        let insider = app.create_user_in_group("insider", 7).await;
        let outsider = app.create_user_in_group("outsider", 8).await;

        join_challenge(&app.state, insider.id, challenge.id)
            .await
            .unwrap();
        let err = join_challenge(&app.state, outsider.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn completed_challenge_rejects_joins() {
        let app = TestEngine::spawn().await;
        let (owner_id, _, challenge) = setup(&app).await;
        complete_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();
        let student = app.create_user("student").await;

        let err = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_joins_admit_one() {
        let app = TestEngine::spawn().await;
        let (_, course_id, challenge) = setup(&app).await;
        let student = app.create_user("student").await;

        let (first, second) = tokio::join!(
            join_challenge(&app.state, student.id, challenge.id),
            join_challenge(&app.state, student.id, challenge.id),
        );
        let (joined, rejected): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(Result::is_ok);
        assert_eq!(joined.len(), 1);
        assert!(matches!(rejected[0], Err(EngineError::Conflict(_))));

        let participant = find_participant(&app.db, challenge.id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert!(participant.challenge_course_id.is_some());
        assert_eq!(app.provisioner.repositories().len(), 1);
        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::SyncCopy)));
    }

    #[tokio::test]
    async fn failed_clone_abandons_the_join() {
        let app = TestEngine::spawn().await;
        let (_, course_id, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        app.provisioner.fail_repositories(2);

        let err = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalProvisioningFailed(_)));
        let participant = find_participant(&app.db, challenge.id, student.id)
            .await
            .unwrap();
        assert!(participant.is_none());
        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, None);

        let participant = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        assert!(participant.challenge_course_id.is_some());
        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::SyncCopy)));
    }

    #[tokio::test]
    async fn failed_clone_restores_the_previous_grant() {
        let app = TestEngine::spawn().await;
        let (owner_id, course_id, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        grant_access(&app.state, owner_id, course_id, student.id, AccessTier::ReadOnly)
            .await
            .unwrap();
        app.provisioner.fail_repositories(2);

        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();

        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::ReadOnly)));
    }
}

mod leaving {
    use super::*;

    #[tokio::test]
    async fn leave_downgrades_access() {
        let app = TestEngine::spawn().await;
        let (_, course_id, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        let participant = leave_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::Left);
        assert_eq!(participant.rank, None);
        assert!(participant.left_at.is_some());

        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::Copy)));
    }

    #[tokio::test]
    async fn left_is_terminal() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        leave_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        let err = leave_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        let err = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn leaving_a_project_challenge_downgrades_its_course() {
        let app = TestEngine::spawn().await;
        let (_, course_id, challenge) = setup_project(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::SyncCopy)));

        leave_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::Copy)));
    }

    #[tokio::test]
    async fn leaving_after_the_course_is_deleted() {
        let app = TestEngine::spawn().await;
        let (owner_id, course_id, challenge) = setup_project(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        delete_course(&app.state, owner_id, course_id).await.unwrap();

        let participant = leave_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::Left);

        let stored = find_participant(&app.db, challenge.id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ParticipantStatus::Left);
        assert!(stored.left_at.is_some());
    }

    #[tokio::test]
    async fn non_participant_cannot_leave() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        let student = app.create_user("student").await;

        let err = leave_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn activation_promotes_joined_participants() {
        let app = TestEngine::spawn().await;
        let (owner_id, _, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        let challenge = activate_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();
        assert_status(&challenge, ChallengeStatus::Active);

        let participant = find_participant(&app.db, challenge.id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::InProgress);
        assert!(
            app.notifier
                .events_for(student.id)
                .contains(&NotificationEvent::ChallengeStarted)
        );

        let err = activate_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn only_creator_manages_lifecycle() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        let other = app.create_user("other").await;

        let err = activate_challenge(&app.state, other.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        let err = delete_challenge(&app.state, other.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn completion_fails_unfinished_participants() {
        let app = TestEngine::spawn().await;
        let (owner_id, _, challenge) = setup(&app).await;
        let finisher = app.create_user("finisher").await;
        let straggler = app.create_user("straggler").await;
        join_challenge(&app.state, finisher.id, challenge.id)
            .await
            .unwrap();
        join_challenge(&app.state, straggler.id, challenge.id)
            .await
            .unwrap();
        activate_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();
        update_participant_progress(
            &app.state,
            finisher.id,
            challenge.id,
            json!({ "projectsCompleted": 5 }),
        )
        .await
        .unwrap();

        let challenge = complete_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();
        assert_status(&challenge, ChallengeStatus::Completed);

        let finished = find_participant(&app.db, challenge.id, finisher.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, ParticipantStatus::Completed);
        assert_eq!(finished.rank, Some(1));

        let failed = find_participant(&app.db, challenge.id, straggler.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ParticipantStatus::Failed);
        assert_eq!(failed.rank, None);
        assert!(
            app.notifier
                .events_for(straggler.id)
                .contains(&NotificationEvent::ChallengeFailed)
        );

        let err = complete_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_cancels_and_downgrades() {
        let app = TestEngine::spawn().await;
        let (owner_id, course_id, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        delete_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();

        let err = find_challenge(&app.db, challenge.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        let stored = challenge::Entity::find_by_id(challenge.id)
            .one(&app.db)
            .await
            .unwrap()
            .unwrap();
        assert_status(&stored, ChallengeStatus::Cancelled);
        assert!(stored.is_deleted);

        let level = check_access(&app.state, student.id, course_id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::Copy)));
        assert!(
            app.notifier
                .events_for(student.id)
                .contains(&NotificationEvent::ChallengeCancelled)
        );
    }
}

mod progress {
    use super::*;

    async fn active_with_participant(app: &TestEngine) -> (i32, i32) {
        let (owner_id, _, challenge) = setup(app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();
        activate_challenge(&app.state, owner_id, challenge.id)
            .await
            .unwrap();
        (challenge.id, student.id)
    }

    #[tokio::test]
    async fn reaching_criteria_completes_participant() {
        let app = TestEngine::spawn().await;
        let (challenge_id, student_id) = active_with_participant(&app).await;

        let participant = update_participant_progress(
            &app.state,
            student_id,
            challenge_id,
            json!({ "projectsCompleted": 5 }),
        )
        .await
        .unwrap();
        assert_eq!(participant.status, ParticipantStatus::Completed);
        assert!(participant.completed_at.is_some());
        assert_eq!(participant.progress, json!({ "projectsCompleted": 5 }));

        let stats = user_stats::Entity::find_by_id(student_id)
            .one(&app.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.challenges_completed, 1);
    }

    #[tokio::test]
    async fn partial_progress_stays_in_progress() {
        let app = TestEngine::spawn().await;
        let (challenge_id, student_id) = active_with_participant(&app).await;

        let participant = update_participant_progress(
            &app.state,
            student_id,
            challenge_id,
            json!({ "projectsCompleted": 3 }),
        )
        .await
        .unwrap();
        assert_eq!(participant.status, ParticipantStatus::InProgress);
        assert_eq!(participant.completed_at, None);
    }

    #[tokio::test]
    async fn unknown_metric_is_rejected() {
        let app = TestEngine::spawn().await;
        let (challenge_id, student_id) = active_with_participant(&app).await;

        let err = update_participant_progress(
            &app.state,
            student_id,
            challenge_id,
            json!({ "totalCommits": 3 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn completed_participant_is_frozen() {
        let app = TestEngine::spawn().await;
        let (challenge_id, student_id) = active_with_participant(&app).await;
        update_participant_progress(
            &app.state,
            student_id,
            challenge_id,
            json!({ "projectsCompleted": 6 }),
        )
        .await
        .unwrap();

        let err = update_participant_progress(
            &app.state,
            student_id,
            challenge_id,
            json!({ "projectsCompleted": 7 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn draft_challenge_rejects_progress() {
        let app = TestEngine::spawn().await;
        let (_, _, challenge) = setup(&app).await;
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap();

        let err = update_participant_progress(
            &app.state,
            student.id,
            challenge.id,
            json!({ "projectsCompleted": 5 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}

mod scheduler {
    use super::*;
    use engine::challenge::run_scheduler;

    #[tokio::test]
    async fn zero_interval_still_sweeps() {
        let mut config = crate::common::test_config();
        config.scheduler.interval_secs = 0;
        let app = TestEngine::with_config(config).await;
        let owner = app.create_user("owner").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;
        let mut due = new_challenge(course.id, json!({ "totalCommits": 10 }));
        due.start_date = Some(hours_ago(1));
        let due = create_challenge(&app.state, owner.id, due).await.unwrap();

        let stopped = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            run_scheduler(app.state.clone()),
        )
        .await;
        assert!(stopped.is_err());
        assert_status(
            &find_challenge(&app.db, due.id).await.unwrap(),
            ChallengeStatus::Active,
        );
    }

    #[tokio::test]
    async fn sweep_applies_due_transitions_once() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;

        let mut open = new_challenge(course.id, json!({ "totalCommits": 10 }));
        open.start_date = Some(hours_ago(2));
        let open = create_challenge(&app.state, owner.id, open).await.unwrap();

        let mut over = new_challenge(course.id, json!({ "totalCommits": 10 }));
        over.start_date = Some(hours_ago(5));
        over.end_date = Some(hours_ago(1));
        let over = create_challenge(&app.state, owner.id, over).await.unwrap();
        let student = app.create_user("student").await;
        join_challenge(&app.state, student.id, over.id).await.unwrap();

        let mut later = new_challenge(course.id, json!({ "totalCommits": 10 }));
        later.start_date = Some(Utc::now() + chrono::Duration::days(3));
        let later = create_challenge(&app.state, owner.id, later).await.unwrap();

        let report = process_scheduled_transitions(&app.state, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.activated, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed_participants, 1);

        assert_status(
            &find_challenge(&app.db, open.id).await.unwrap(),
            ChallengeStatus::Active,
        );
        assert_status(
            &find_challenge(&app.db, over.id).await.unwrap(),
            ChallengeStatus::Completed,
        );
        assert_status(
            &find_challenge(&app.db, later.id).await.unwrap(),
            ChallengeStatus::Draft,
        );
        let participant = find_participant(&app.db, over.id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::Failed);

        let again = process_scheduled_transitions(&app.state, Utc::now())
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
