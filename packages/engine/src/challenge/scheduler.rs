use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ChallengeStatus;
use sea_orm::*;
use serde::Serialize;
use tracing::{error, info};

use super::lifecycle::{activate, complete};
use crate::entity::challenge;
use crate::error::Result;
use crate::invitations::expire_stale;
use crate::scoring::update_challenge_rankings;
use crate::state::EngineState;

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub activated: usize,
    pub completed: usize,
    pub failed_participants: usize,
    pub rewards_awarded: usize,
    pub expired_offers: u64,
    pub rankings_refreshed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.activated == 0
            && self.completed == 0
            && self.expired_offers == 0
    }
}

/// Run every time-based transition that is due at `now`. Idempotent: a second call with
/// the same `now` changes nothing. A failure on one challenge is logged and the sweep
/// moves on.
pub async fn process_scheduled_transitions(
    state: &EngineState,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let due_to_start: Vec<i32> = challenge::Entity::find()
        .select_only()
        .column(challenge::Column::Id)
        .filter(challenge::Column::IsDeleted.eq(false))
        .filter(challenge::Column::Status.eq(ChallengeStatus::Draft))
        .filter(challenge::Column::StartDate.lte(now))
        .into_tuple()
        .all(&state.db)
        .await?;
    for challenge_id in due_to_start {
        match activate(state, challenge_id).await {
            Ok(true) => report.activated += 1,
            Ok(false) => {}
            Err(e) => error!(challenge_id, error = %e, "Failed to activate challenge"),
        }
    }

    let due_to_end: Vec<i32> = challenge::Entity::find()
        .select_only()
        .column(challenge::Column::Id)
        .filter(challenge::Column::IsDeleted.eq(false))
        .filter(challenge::Column::Status.is_in([ChallengeStatus::Draft, ChallengeStatus::Active]))
        .filter(challenge::Column::EndDate.lt(now))
        .into_tuple()
        .all(&state.db)
        .await?;
    for challenge_id in due_to_end {
        match complete(state, challenge_id).await {
            Ok(Some(outcome)) => {
                report.completed += 1;
                report.failed_participants += outcome.failed;
                report.rewards_awarded += outcome.rewards;
            }
            Ok(None) => {}
            Err(e) => error!(challenge_id, error = %e, "Failed to complete challenge"),
        }
    }

    match expire_stale(&state.db, now).await {
        Ok(expired) => report.expired_offers = expired,
        Err(e) => error!(error = %e, "Failed to expire stale invitations"),
    }

    let active: Vec<i32> = challenge::Entity::find()
        .select_only()
        .column(challenge::Column::Id)
        .filter(challenge::Column::IsDeleted.eq(false))
        .filter(challenge::Column::Status.eq(ChallengeStatus::Active))
        .into_tuple()
        .all(&state.db)
        .await?;
    for challenge_id in active {
        match update_challenge_rankings(&state.db, challenge_id).await {
            Ok(_) => report.rankings_refreshed += 1,
            Err(e) => error!(challenge_id, error = %e, "Failed to refresh rankings"),
        }
    }

    Ok(report)
}

/// Run the scheduled sweep forever on the configured interval.
pub async fn run_scheduler(state: EngineState) {
    let period = Duration::from_secs(Ord::max(state.config.scheduler.interval_secs, 1));

    info!(
        interval_secs = state.config.scheduler.interval_secs,
        "Starting challenge scheduler"
    );

    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        match process_scheduled_transitions(&state, Utc::now()).await {
            Ok(report) if !report.is_empty() => info!(
                activated = report.activated,
                completed = report.completed,
                failed_participants = report.failed_participants,
                rewards_awarded = report.rewards_awarded,
                expired_offers = report.expired_offers,
                "Scheduled sweep applied transitions"
            ),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Scheduled sweep failed"),
        }
    }
}
