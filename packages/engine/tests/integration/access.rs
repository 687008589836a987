use ::common::AccessTier;

use engine::access::{
    AccessGrants, AccessLevel, check_access, downgrade_sync_to_copy, grant_access, remove_access,
};
use engine::courses::delete_course;
use engine::error::EngineError;
use engine::notify::NotificationEvent;

use crate::common::TestEngine;

mod access_check {
    use super::*;

    #[tokio::test]
    async fn owner_has_owner_access() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let level = check_access(&app.state, owner.id, course.id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Owner));
        assert!(level.unwrap().can_clone());
    }

    #[tokio::test]
    async fn stranger_has_no_access() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let stranger = app.create_user("stranger").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let level = check_access(&app.state, stranger.id, course.id).await.unwrap();
        assert_eq!(level, None);
    }

    #[tokio::test]
    async fn deleted_course_is_not_found() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course(owner.id, "Rust 101").await;
        delete_course(&app.state, owner.id, course.id).await.unwrap();

        let err = check_access(&app.state, owner.id, course.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}

mod granting {
    use super::*;

    #[tokio::test]
    async fn owner_grants_and_upgrades() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let grant = grant_access(&app.state, owner.id, course.id, student.id, AccessTier::ReadOnly)
            .await
            .unwrap();
        assert_eq!(grant.tier, AccessTier::ReadOnly);

        let grant = grant_access(&app.state, owner.id, course.id, student.id, AccessTier::Copy)
            .await
            .unwrap();
        assert_eq!(grant.tier, AccessTier::Copy);

        let level = check_access(&app.state, student.id, course.id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::Copy)));
        assert!(
            app.notifier
                .events_for(student.id)
                .contains(&NotificationEvent::CourseShared)
        );
    }

    #[tokio::test]
    async fn sync_copy_cannot_be_granted_directly() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let err = grant_access(&app.state, owner.id, course.id, student.id, AccessTier::SyncCopy)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn non_owner_cannot_grant() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let other = app.create_user("other").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let err = grant_access(&app.state, other.id, course.id, student.id, AccessTier::Copy)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn regrant_after_removal_restores_the_row() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let first = grant_access(&app.state, owner.id, course.id, student.id, AccessTier::Copy)
            .await
            .unwrap();
        remove_access(&app.state, owner.id, course.id, student.id)
            .await
            .unwrap();
        assert_eq!(check_access(&app.state, student.id, course.id).await.unwrap(), None);

        let second = grant_access(&app.state, owner.id, course.id, student.id, AccessTier::ReadOnly)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.tier, AccessTier::ReadOnly);
        assert!(!second.is_deleted);
    }

    #[tokio::test]
    async fn removing_missing_grant_is_not_found() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let err = remove_access(&app.state, owner.id, course.id, student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}

mod sync_copy {
    use super::*;

    #[tokio::test]
    async fn ensure_upgrades_but_never_downgrades() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;
        grant_access(&app.state, owner.id, course.id, student.id, AccessTier::ReadOnly)
            .await
            .unwrap();

        let grants = AccessGrants::new(&app.db);
        let grant = grants
            .ensure_sync_copy_access(course.id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.tier, AccessTier::SyncCopy);

        // A later COPY grant leaves SYNC_COPY in place.
        let grant = grant_access(&app.state, owner.id, course.id, student.id, AccessTier::Copy)
            .await
            .unwrap();
        assert_eq!(grant.tier, AccessTier::SyncCopy);

        let again = grants
            .ensure_sync_copy_access(course.id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, grant.id);
        assert_eq!(again.tier, AccessTier::SyncCopy);
    }

    #[tokio::test]
    async fn owner_needs_no_grant() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let grant = AccessGrants::new(&app.db)
            .ensure_sync_copy_access(course.id, owner.id)
            .await
            .unwrap();
        assert!(grant.is_none());
    }

    #[tokio::test]
    async fn downgrade_is_idempotent() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;
        AccessGrants::new(&app.db)
            .ensure_sync_copy_access(course.id, student.id)
            .await
            .unwrap();

        assert!(downgrade_sync_to_copy(&app.state, course.id, student.id).await.unwrap());
        assert!(!downgrade_sync_to_copy(&app.state, course.id, student.id).await.unwrap());

        let level = check_access(&app.state, student.id, course.id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::Copy)));
    }

    #[tokio::test]
    async fn downgrade_leaves_read_only_alone() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;
        grant_access(&app.state, owner.id, course.id, student.id, AccessTier::ReadOnly)
            .await
            .unwrap();

        assert!(!downgrade_sync_to_copy(&app.state, course.id, student.id).await.unwrap());
        let level = check_access(&app.state, student.id, course.id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::ReadOnly)));
    }

    #[tokio::test]
    async fn deleting_course_revokes_every_grant() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let a = app.create_user("a").await;
        let b = app.create_user("b").await;
        let course = app.create_course(owner.id, "Rust 101").await;
        grant_access(&app.state, owner.id, course.id, a.id, AccessTier::Copy)
            .await
            .unwrap();
        AccessGrants::new(&app.db)
            .ensure_sync_copy_access(course.id, b.id)
            .await
            .unwrap();

        let err = delete_course(&app.state, a.id, course.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        delete_course(&app.state, owner.id, course.id).await.unwrap();
        let live = AccessGrants::new(&app.db)
            .remove_all_for_course(course.id)
            .await
            .unwrap();
        assert_eq!(live, 0);
    }
}
