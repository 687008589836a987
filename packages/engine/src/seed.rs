use chrono::Utc;
use sea_orm::*;
use serde_json::json;
use tracing::info;

use crate::entity::badge;

/// Starter catalog: (name, description, category, rarity, criteria).
fn default_badges() -> Vec<(&'static str, &'static str, &'static str, &'static str, serde_json::Value)> {
    vec![
        (
            "Welcome Aboard",
            "Signed in for the first time.",
            "onboarding",
            "common",
            json!({ "loginDays": -1 }),
        ),
        (
            "First Hundred",
            "Pushed 100 commits.",
            "commits",
            "common",
            json!({ "totalCommits": 100 }),
        ),
        (
            "Commit Machine",
            "Pushed 1000 commits.",
            "commits",
            "epic",
            json!({ "totalCommits": 1000 }),
        ),
        (
            "Reviewer",
            "Reviewed 25 pull requests.",
            "reviews",
            "rare",
            json!({ "totalReviews": 25 }),
        ),
        (
            "Week Streak",
            "Active seven days in a row.",
            "streaks",
            "common",
            json!({ "streakDays": 7 }),
        ),
        (
            "Month Streak",
            "Active thirty days in a row.",
            "streaks",
            "rare",
            json!({ "streakDays": 30 }),
        ),
        (
            "Builder",
            "Completed five projects.",
            "projects",
            "rare",
            json!({ "projectsCompleted": 5 }),
        ),
        (
            "Graduate",
            "Completed a course.",
            "courses",
            "rare",
            json!({ "coursesCompleted": 1 }),
        ),
        (
            "Challenger",
            "Completed a challenge.",
            "challenges",
            "common",
            json!({ "challengesCompleted": 1 }),
        ),
        (
            "Flawless",
            "Completed ten projects with a perfect score.",
            "projects",
            "legendary",
            json!({ "projectsCompleted": 10, "perfectScore": true }),
        ),
    ]
}

/// Insert the starter badges that do not exist yet.
pub async fn seed_default_badges(db: &DatabaseConnection) -> Result<(), DbErr> {
    let mut inserted = 0u32;
    for (name, description, category, rarity, criteria) in default_badges() {
        let model = badge::ActiveModel {
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            category: Set(category.to_string()),
            rarity: Set(rarity.to_string()),
            criteria: Set(criteria),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let result = badge::Entity::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(badge::Column::Name)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await;

        match result {
            Ok(n) if n > 0 => inserted += 1,
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e),
        }
    }

    if inserted > 0 {
        info!("Seeded {} new badges", inserted);
    }

    Ok(())
}
