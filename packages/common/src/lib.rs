pub mod criteria;
pub mod ranking;
pub mod rewards;
pub mod status;

pub use criteria::{CriteriaError, CriteriaSet, Evaluation, MetricSnapshot, MetricValue};
pub use ranking::{RankedStanding, Standing, rank_standings};
pub use rewards::{BadgeRef, RewardError, RewardTable};
pub use status::{
    AccessTier, ChallengeStatus, ChallengeType, InvitationStatus, ParticipantStatus,
    ProjectStatus, SagaPhase, StepStatus,
};
