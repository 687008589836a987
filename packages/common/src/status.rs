#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a stored or user-supplied status string is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub invalid: String,
    pub valid: &'static [&'static str],
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid {} '{}'. Valid values: {}",
            self.kind,
            self.invalid,
            self.valid.join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

/// Generates `as_str`, `ALL`, `Display` and `FromStr` for a string-backed enum.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $value:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$(Self::$variant),+];

            const NAMES: &'static [&'static str] = &[$($value),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(ParseStatusError {
                        kind: $kind,
                        invalid: s.to_string(),
                        valid: Self::NAMES,
                    }),
                }
            }
        }
    };
}

/// Progress state of a project inside a course.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
pub enum ProjectStatus {
    #[default]
    #[serde(rename = "not started")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "not started"))]
    NotStarted,
    #[serde(rename = "in progress")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "in progress"))]
    InProgress,
    #[serde(rename = "completed")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
}

string_enum!(ProjectStatus, "project status", {
    NotStarted => "not started",
    InProgress => "in progress",
    Completed => "completed",
});

/// Progress state of a single step inside a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "todo"))]
    Todo,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "in_progress"))]
    InProgress,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "done"))]
    Done,
}

string_enum!(StepStatus, "step status", {
    Todo => "todo",
    InProgress => "in_progress",
    Done => "done",
});

/// Permission level a non-owner holds on a course.
///
/// Ownership is never stored as a tier; see `AccessLevel` in the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessTier {
    /// May view the course.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "READ_ONLY"))]
    ReadOnly,
    /// May view and clone the course.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "COPY"))]
    Copy,
    /// Challenge-bound working copy. Only the challenge lifecycle creates it.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "SYNC_COPY"))]
    SyncCopy,
}

string_enum!(AccessTier, "access tier", {
    ReadOnly => "READ_ONLY",
    Copy => "COPY",
    SyncCopy => "SYNC_COPY",
});

impl AccessTier {
    /// Whether this tier allows cloning the course into the holder's namespace.
    pub fn can_clone(&self) -> bool {
        matches!(self, Self::Copy | Self::SyncCopy)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "STANDARD"))]
    Standard,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "TIME_LIMITED"))]
    TimeLimited,
}

string_enum!(ChallengeType, "challenge type", {
    Standard => "STANDARD",
    TimeLimited => "TIME_LIMITED",
});

/// Lifecycle of a challenge.
///
/// `DRAFT -> ACTIVE -> COMPLETED`, `DRAFT -> CANCELLED`. Nothing leaves a terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "DRAFT"))]
    Draft,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ACTIVE"))]
    Active,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "COMPLETED"))]
    Completed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "CANCELLED"))]
    Cancelled,
}

string_enum!(ChallengeStatus, "challenge status", {
    Draft => "DRAFT",
    Active => "ACTIVE",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether users may still join.
    pub fn accepts_participants(&self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }

    pub fn can_transition_to(&self, next: ChallengeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Draft, Self::Completed)
                | (Self::Draft, Self::Cancelled)
                | (Self::Active, Self::Completed)
        )
    }
}

/// Lifecycle of a challenge participant.
///
/// `JOINED -> IN_PROGRESS -> {COMPLETED | FAILED}`, and any non-terminal state may move to `LEFT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "JOINED"))]
    Joined,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "IN_PROGRESS"))]
    InProgress,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "COMPLETED"))]
    Completed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "FAILED"))]
    Failed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "LEFT"))]
    Left,
}

string_enum!(ParticipantStatus, "participant status", {
    Joined => "JOINED",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Left => "LEFT",
});

impl ParticipantStatus {
    /// Statuses that take part in ranking.
    pub const RANKED: &'static [ParticipantStatus] =
        &[Self::Joined, Self::InProgress, Self::Completed];

    /// Statuses that still count against a challenge's participant cap.
    pub const ENROLLED: &'static [ParticipantStatus] = &[
        Self::Joined,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Left)
    }

    pub fn is_ranked(&self) -> bool {
        Self::RANKED.contains(self)
    }

    pub fn can_transition_to(&self, next: ParticipantStatus) -> bool {
        match (self, next) {
            (Self::Joined, Self::InProgress) => true,
            (Self::Joined | Self::InProgress, Self::Completed | Self::Failed) => true,
            (from, Self::Left) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Status shared by invites and join requests. Everything except `PENDING` is final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PENDING"))]
    Pending,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ACCEPTED"))]
    Accepted,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "REJECTED"))]
    Rejected,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "EXPIRED"))]
    Expired,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "CANCELLED"))]
    Cancelled,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "APPROVED"))]
    Approved,
}

string_enum!(InvitationStatus, "invitation status", {
    Pending => "PENDING",
    Accepted => "ACCEPTED",
    Rejected => "REJECTED",
    Expired => "EXPIRED",
    Cancelled => "CANCELLED",
    Approved => "APPROVED",
});

impl InvitationStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Phase of a clone saga, persisted so that an interrupted clone is diagnosable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaPhase {
    /// Copying the course tree inside a database transaction.
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "LOCAL"))]
    Local,
    /// Creating boards, repositories and issues on the external service.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PROVISIONING"))]
    Provisioning,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "COMMITTED"))]
    Committed,
    /// Deleting external resources after the retry was exhausted.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ROLLING_BACK"))]
    RollingBack,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ROLLED_BACK"))]
    RolledBack,
    /// The local phase failed; nothing was written.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "FAILED"))]
    Failed,
}

string_enum!(SagaPhase, "saga phase", {
    Local => "LOCAL",
    Provisioning => "PROVISIONING",
    Committed => "COMMITTED",
    RollingBack => "ROLLING_BACK",
    RolledBack => "ROLLED_BACK",
    Failed => "FAILED",
});
