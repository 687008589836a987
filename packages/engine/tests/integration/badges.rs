use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;

use engine::badges::{
    NewBadge, award_badge, check_and_award_badges, check_badge_eligibility, create_badge,
};
use engine::entity::badge;
use engine::error::EngineError;
use engine::notify::NotificationEvent;
use engine::seed::seed_default_badges;

use crate::common::TestEngine;

fn new_badge(name: &str, criteria: serde_json::Value) -> NewBadge {
    NewBadge {
        name: name.to_string(),
        description: String::new(),
        category: "test".into(),
        rarity: "common".into(),
        criteria,
    }
}

async fn make_badge(app: &TestEngine, name: &str, criteria: serde_json::Value) -> badge::Model {
    create_badge(&app.state, new_badge(name, criteria))
        .await
        .expect("Failed to create badge")
}

mod catalog {
    use super::*;

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let app = TestEngine::spawn().await;
        make_badge(&app, "Committer", json!({ "totalCommits": 10 })).await;

        let err = create_badge(&app.state, new_badge("Committer", json!({ "totalCommits": 20 })))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn malformed_criteria_is_rejected() {
        let app = TestEngine::spawn().await;

        for criteria in [json!([]), json!({}), json!({ "totalCommits": "lots" })] {
            let err = create_badge(&app.state, new_badge("Broken", criteria))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn seeding_twice_is_harmless() {
        let app = TestEngine::spawn().await;
        seed_default_badges(&app.db).await.unwrap();
        seed_default_badges(&app.db).await.unwrap();

        let count = badge::Entity::find().count(&app.db).await.unwrap();
        assert_eq!(count, 10);
    }
}

mod eligibility {
    use super::*;

    #[tokio::test]
    async fn sentinel_is_always_eligible() {
        let app = TestEngine::spawn().await;
        let user = app.create_user("newcomer").await;
        let welcome = make_badge(&app, "Welcome", json!({ "loginDays": -1 })).await;

        let result = check_badge_eligibility(&app.state, user.id, welcome.id)
            .await
            .unwrap();
        assert!(result.evaluation.eligible);
        assert!(!result.already_earned);
    }

    #[tokio::test]
    async fn progress_follows_primary_metric() {
        let app = TestEngine::spawn().await;
        let user = app.create_user("dev").await;
        app.set_stats(user.id, 2, 40).await;
        let target = make_badge(
            &app,
            "Prolific",
            json!({ "projectsCompleted": 3, "totalCommits": 100 }),
        )
        .await;

        let result = check_badge_eligibility(&app.state, user.id, target.id)
            .await
            .unwrap();
        assert!(!result.evaluation.eligible);
        assert_eq!(result.evaluation.progress, 40.0);
        assert_eq!(result.evaluation.max_progress, 100.0);
    }

    #[tokio::test]
    async fn unknown_badge_is_not_found() {
        let app = TestEngine::spawn().await;
        let user = app.create_user("dev").await;

        let err = check_badge_eligibility(&app.state, user.id, 77)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}

mod awarding {
    use super::*;

    #[tokio::test]
    async fn award_is_once_per_user() {
        let app = TestEngine::spawn().await;
        let user = app.create_user("dev").await;
        let target = make_badge(&app, "Helper", json!({ "totalReviews": 1 })).await;

        let award = award_badge(&app.state, user.id, target.id).await.unwrap();
        assert_eq!(award.badge_id, target.id);
        assert!(
            app.notifier
                .events_for(user.id)
                .contains(&NotificationEvent::BadgeEarned)
        );

        let err = award_badge(&app.state, user.id, target.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let result = check_badge_eligibility(&app.state, user.id, target.id)
            .await
            .unwrap();
        assert!(result.already_earned);
    }

    #[tokio::test]
    async fn check_and_award_grants_newly_met_badges() {
        let app = TestEngine::spawn().await;
        seed_default_badges(&app.db).await.unwrap();
        let user = app.create_user("dev").await;
        app.set_stats(user.id, 5, 150).await;

        let awarded = check_and_award_badges(&app.state, user.id).await.unwrap();
        let mut names = Vec::new();
        for award in &awarded {
            let b = badge::Entity::find_by_id(award.badge_id)
                .one(&app.db)
                .await
                .unwrap()
                .unwrap();
            names.push(b.name);
        }
        names.sort();
        assert_eq!(names, vec!["Builder", "First Hundred", "Welcome Aboard"]);

        let again = check_and_award_badges(&app.state, user.id).await.unwrap();
        assert!(again.is_empty());
    }
}
