use sea_orm::*;

use crate::entity::user;
use crate::error::{EngineError, Result};

pub async fn find_user<C: ConnectionTrait>(db: &C, id: i32) -> Result<user::Model> {
    user::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| EngineError::NotFound("User not found".into()))
}
