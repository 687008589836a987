use common::{AccessTier, InvitationStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Offer from a course owner to share the course at a given tier.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "course_invite")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub course_id: i32,
    pub inviter_id: i32,
    #[sea_orm(indexed)]
    pub invitee_id: i32,

    /// `READ_ONLY` or `COPY`.
    pub tier: AccessTier,
    pub status: InvitationStatus,

    pub expires_at: DateTimeUtc,
    pub responded_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
