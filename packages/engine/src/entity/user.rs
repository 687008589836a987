use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    /// Credential used to act as this user on the external tracking service.
    /// `None` until the user links an account.
    #[serde(skip_serializing)]
    pub provider_token: Option<String>,

    #[sea_orm(indexed)]
    pub group_id: Option<i32>,
    #[sea_orm(indexed)]
    pub sector_id: Option<i32>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
