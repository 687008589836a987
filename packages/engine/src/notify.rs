//! Fire-and-forget user notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    CloneReady,
    CloneFailed,
    ChallengeJoined,
    ChallengeStarted,
    ChallengeCompleted,
    ChallengeFailed,
    ChallengeLeft,
    ChallengeCancelled,
    InviteReceived,
    InviteAccepted,
    InviteRejected,
    RequestReceived,
    RequestApproved,
    RequestRejected,
    CourseShared,
    BadgeEarned,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloneReady => "CLONE_READY",
            Self::CloneFailed => "CLONE_FAILED",
            Self::ChallengeJoined => "CHALLENGE_JOINED",
            Self::ChallengeStarted => "CHALLENGE_STARTED",
            Self::ChallengeCompleted => "CHALLENGE_COMPLETED",
            Self::ChallengeFailed => "CHALLENGE_FAILED",
            Self::ChallengeLeft => "CHALLENGE_LEFT",
            Self::ChallengeCancelled => "CHALLENGE_CANCELLED",
            Self::InviteReceived => "INVITE_RECEIVED",
            Self::InviteAccepted => "INVITE_ACCEPTED",
            Self::InviteRejected => "INVITE_REJECTED",
            Self::RequestReceived => "REQUEST_RECEIVED",
            Self::RequestApproved => "REQUEST_APPROVED",
            Self::RequestRejected => "REQUEST_REJECTED",
            Self::CourseShared => "COURSE_SHARED",
            Self::BadgeEarned => "BADGE_EARNED",
        }
    }
}

/// Notification delivery transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: i32,
        event: NotificationEvent,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Notifier that only records deliveries in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: i32,
        event: NotificationEvent,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        info!(user_id, event = event.as_str(), %payload, "Notification");
        Ok(())
    }
}

/// Deliver a notification, logging instead of propagating any failure.
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    user_id: i32,
    event: NotificationEvent,
    payload: serde_json::Value,
) {
    if let Err(e) = notifier.notify(user_id, event, payload).await {
        warn!(
            user_id,
            event = event.as_str(),
            error = %e,
            "Failed to deliver notification"
        );
    }
}
