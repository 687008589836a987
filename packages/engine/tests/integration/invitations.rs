use ::common::{AccessTier, InvitationStatus, ParticipantStatus};
use chrono::Utc;
use serde_json::json;

use engine::access::{AccessLevel, check_access};
use engine::challenge::{create_challenge, join_challenge};
use engine::entity::challenge;
use engine::error::EngineError;
use engine::invitations::{
    accept_challenge_invite, accept_course_invite, approve_request, cancel_challenge_invite,
    expire_stale, invite_to_challenge, invite_to_course, reject_challenge_invite, reject_request,
    request_to_join,
};
use engine::notify::NotificationEvent;

use crate::common::{TestEngine, new_challenge, test_config};

async fn private_challenge(app: &TestEngine, creator_id: i32) -> challenge::Model {
    let course = app.create_course_tree(creator_id, "Rust 101", 1).await;
    let mut payload = new_challenge(course.id, json!({ "totalCommits": 10 }));
    payload.is_public = false;
    create_challenge(&app.state, creator_id, payload).await.unwrap()
}

mod challenge_invites {
    use super::*;

    #[tokio::test]
    async fn accepted_invite_joins_private_challenge() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let guest = app.create_user("guest").await;
        let challenge = private_challenge(&app, creator.id).await;

        let invite = invite_to_challenge(&app.state, creator.id, challenge.id, guest.id, None)
            .await
            .unwrap();
        assert_eq!(invite.status, InvitationStatus::Pending);
        assert!(invite.expires_at > Utc::now());
        assert!(
            app.notifier
                .events_for(guest.id)
                .contains(&NotificationEvent::InviteReceived)
        );

        let participant = accept_challenge_invite(&app.state, guest.id, invite.id)
            .await
            .unwrap();
        assert_eq!(participant.status, ParticipantStatus::Joined);
        assert!(
            app.notifier
                .events_for(creator.id)
                .contains(&NotificationEvent::InviteAccepted)
        );

        let err = accept_challenge_invite(&app.state, guest.id, invite.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn only_one_pending_invite_per_user() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let guest = app.create_user("guest").await;
        let challenge = private_challenge(&app, creator.id).await;

        invite_to_challenge(&app.state, creator.id, challenge.id, guest.id, None)
            .await
            .unwrap();
        let err = invite_to_challenge(
            &app.state,
            creator.id,
            challenge.id,
            guest.id,
            Some("again".into()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn only_creator_invites_and_not_self() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let other = app.create_user("other").await;
        let guest = app.create_user("guest").await;
        let challenge = private_challenge(&app, creator.id).await;

        let err = invite_to_challenge(&app.state, other.id, challenge.id, guest.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        let err = invite_to_challenge(&app.state, creator.id, challenge.id, creator.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn rejected_invite_is_final() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let guest = app.create_user("guest").await;
        let challenge = private_challenge(&app, creator.id).await;
        let invite = invite_to_challenge(&app.state, creator.id, challenge.id, guest.id, None)
            .await
            .unwrap();

        let rejected = reject_challenge_invite(&app.state, guest.id, invite.id)
            .await
            .unwrap();
        assert_eq!(rejected.status, InvitationStatus::Rejected);
        assert!(rejected.responded_at.is_some());

        let err = accept_challenge_invite(&app.state, guest.id, invite.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        let err = cancel_challenge_invite(&app.state, creator.id, invite.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn invite_for_someone_else_is_forbidden() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let guest = app.create_user("guest").await;
        let intruder = app.create_user("intruder").await;
        let challenge = private_challenge(&app, creator.id).await;
        let invite = invite_to_challenge(&app.state, creator.id, challenge.id, guest.id, None)
            .await
            .unwrap();

        let err = accept_challenge_invite(&app.state, intruder.id, invite.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn expired_invite_cannot_be_accepted() {
        let mut config = test_config();
        config.invitations.ttl_hours = -1;
        let app = TestEngine::with_config(config).await;
        let creator = app.create_user("creator").await;
        let guest = app.create_user("guest").await;
        let challenge = private_challenge(&app, creator.id).await;
        let invite = invite_to_challenge(&app.state, creator.id, challenge.id, guest.id, None)
            .await
            .unwrap();

        let err = accept_challenge_invite(&app.state, guest.id, invite.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // The offer is now EXPIRED, which is final.
        let err = accept_challenge_invite(&app.state, guest.id, invite.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}

mod join_requests {
    use super::*;

    #[tokio::test]
    async fn approved_request_joins() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let student = app.create_user("student").await;
        let challenge = private_challenge(&app, creator.id).await;

        let request = request_to_join(&app.state, student.id, challenge.id, Some("please".into()))
            .await
            .unwrap();
        assert!(
            app.notifier
                .events_for(creator.id)
                .contains(&NotificationEvent::RequestReceived)
        );

        let err = approve_request(&app.state, student.id, request.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let participant = approve_request(&app.state, creator.id, request.id)
            .await
            .unwrap();
        assert_eq!(participant.user_id, student.id);
        assert!(
            app.notifier
                .events_for(student.id)
                .contains(&NotificationEvent::RequestApproved)
        );
    }

    #[tokio::test]
    async fn public_challenge_needs_no_request() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let student = app.create_user("student").await;
        let course = app.create_course_tree(creator.id, "Rust 101", 1).await;
        let challenge = app
            .create_challenge(creator.id, course.id, json!({ "totalCommits": 10 }))
            .await;

        let err = request_to_join(&app.state, student.id, challenge.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn rejected_request_keeps_challenge_closed() {
        let app = TestEngine::spawn().await;
        let creator = app.create_user("creator").await;
        let student = app.create_user("student").await;
        let challenge = private_challenge(&app, creator.id).await;
        let request = request_to_join(&app.state, student.id, challenge.id, None)
            .await
            .unwrap();

        let rejected = reject_request(&app.state, creator.id, request.id)
            .await
            .unwrap();
        assert_eq!(rejected.status, InvitationStatus::Rejected);
        assert_eq!(rejected.reviewed_by, Some(creator.id));

        let err = join_challenge(&app.state, student.id, challenge.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }
}

mod course_invites {
    use super::*;

    #[tokio::test]
    async fn copy_invite_grants_and_clones() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;

        let invite = invite_to_course(&app.state, owner.id, course.id, student.id, AccessTier::Copy)
            .await
            .unwrap();
        let accepted = accept_course_invite(&app.state, student.id, invite.id)
            .await
            .unwrap();

        assert_eq!(accepted.grant.tier, AccessTier::Copy);
        let clone_id = accepted.cloned_course_id.expect("clone for COPY invite");
        assert_ne!(clone_id, course.id);
        let level = check_access(&app.state, student.id, course.id).await.unwrap();
        assert_eq!(level, Some(AccessLevel::Granted(AccessTier::Copy)));
    }

    #[tokio::test]
    async fn read_only_invite_does_not_clone() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course_tree(owner.id, "Rust 101", 1).await;

        let invite =
            invite_to_course(&app.state, owner.id, course.id, student.id, AccessTier::ReadOnly)
                .await
                .unwrap();
        let accepted = accept_course_invite(&app.state, student.id, invite.id)
            .await
            .unwrap();
        assert_eq!(accepted.grant.tier, AccessTier::ReadOnly);
        assert_eq!(accepted.cloned_course_id, None);
    }

    #[tokio::test]
    async fn sync_copy_cannot_be_offered() {
        let app = TestEngine::spawn().await;
        let owner = app.create_user("owner").await;
        let student = app.create_user("student").await;
        let course = app.create_course(owner.id, "Rust 101").await;

        let err = invite_to_course(&app.state, owner.id, course.id, student.id, AccessTier::SyncCopy)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }
}

#[tokio::test]
async fn stale_offers_are_expired_in_bulk() {
    let mut config = test_config();
    config.invitations.ttl_hours = -1;
    let app = TestEngine::with_config(config).await;
    let creator = app.create_user("creator").await;
    let a = app.create_user("a").await;
    let b = app.create_user("b").await;
    let challenge = private_challenge(&app, creator.id).await;
    invite_to_challenge(&app.state, creator.id, challenge.id, a.id, None)
        .await
        .unwrap();
    request_to_join(&app.state, b.id, challenge.id, None)
        .await
        .unwrap();

    assert_eq!(expire_stale(&app.db, Utc::now()).await.unwrap(), 2);
    assert_eq!(expire_stale(&app.db, Utc::now()).await.unwrap(), 0);
}
