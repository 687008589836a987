use common::InvitationStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "challenge_invite")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub challenge_id: i32,
    pub inviter_id: i32,
    #[sea_orm(indexed)]
    pub invitee_id: i32,

    pub status: InvitationStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,

    pub expires_at: DateTimeUtc,
    pub responded_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
