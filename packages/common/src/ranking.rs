//! Deterministic, tie-aware challenge ranking.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::ParticipantStatus;

/// A participant's standing before ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub participant_id: i32,
    pub status: ParticipantStatus,
    pub points: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

/// A standing with its assigned rank. `rank` is `None` for failed participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedStanding {
    pub standing: Standing,
    pub rank: Option<i32>,
}

/// Points descending, then completion ascending (unfinished last), then join ascending.
fn leaderboard_order(a: &Standing, b: &Standing) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| match (a.completed_at, b.completed_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.participant_id.cmp(&b.participant_id))
}

/// Rank standings using standard competition ranking ("1, 1, 3").
///
/// Ranked participants (`JOINED`, `IN_PROGRESS`, `COMPLETED`) come first. Equal points
/// share a rank; the next distinct score takes its 1-based position. `FAILED` participants
/// follow, unranked, in the same order. `LEFT` participants are dropped.
pub fn rank_standings(standings: Vec<Standing>) -> Vec<RankedStanding> {
    let (mut ranked, mut failed): (Vec<Standing>, Vec<Standing>) = standings
        .into_iter()
        .filter(|s| s.status != ParticipantStatus::Left)
        .partition(|s| s.status.is_ranked());

    ranked.sort_by(leaderboard_order);
    failed.sort_by(leaderboard_order);

    let mut result = Vec::with_capacity(ranked.len() + failed.len());
    let mut previous: Option<(i32, i32)> = None;

    for (index, standing) in ranked.into_iter().enumerate() {
        let rank = match previous {
            Some((points, rank)) if points == standing.points => rank,
            _ => index as i32 + 1,
        };
        previous = Some((standing.points, rank));
        result.push(RankedStanding {
            standing,
            rank: Some(rank),
        });
    }

    result.extend(
        failed
            .into_iter()
            .map(|standing| RankedStanding { standing, rank: None }),
    );

    result
}

/// Round a sum of evaluation scores to whole points.
pub fn round_points(total: f64) -> i32 {
    total.round() as i32
}
