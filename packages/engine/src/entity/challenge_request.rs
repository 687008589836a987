use common::InvitationStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A user's request to join a private challenge, reviewed by its creator.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "challenge_request")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub challenge_id: i32,
    #[sea_orm(indexed)]
    pub user_id: i32,

    pub status: InvitationStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,

    pub reviewed_by: Option<i32>,
    pub expires_at: DateTimeUtc,
    pub responded_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
