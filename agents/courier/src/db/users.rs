use eyre::Result;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use sengine_core::phone;

use super::entities::{user, user_number};
use super::CourierDb;

impl CourierDb {
    /// One user by id.
    pub async fn user_by_id(&self, id: i64) -> Result<Option<user::Model>> {
        Ok(user::Entity::find_by_id(id).one(self.reader()).await?)
    }

    /// All active, non-deleted provisioned numbers for a user.
    pub async fn active_user_numbers(&self, user_id: i64) -> Result<Vec<user_number::Model>> {
        Ok(user_number::Entity::find()
            .filter(user_number::Column::UserId.eq(user_id))
            .filter(user_number::Column::Status.eq(user_number::NUMBER_ACTIVE))
            .filter(user_number::Column::DeletedAt.is_null())
            .all(self.reader())
            .await?)
    }

    /// Resolve the provisioned number an inbound message arrived on.
    ///
    /// Numbers are stored E.164, so a suffix match on the last ten digits
    /// narrows the candidates in SQL; the fuzzy comparison confirms in Rust.
    pub async fn user_number_by_phone(&self, raw: &str) -> Result<Option<user_number::Model>> {
        let digits = phone::digits(raw);
        if digits.len() < 10 {
            return Ok(None);
        }
        let suffix = &digits[digits.len() - 10..];
        let candidates = user_number::Entity::find()
            .filter(user_number::Column::Phone.like(&format!("%{suffix}")))
            .filter(user_number::Column::Status.eq(user_number::NUMBER_ACTIVE))
            .filter(user_number::Column::DeletedAt.is_null())
            .all(self.reader())
            .await?;
        Ok(candidates
            .into_iter()
            .find(|candidate| phone::numbers_match(&candidate.phone, raw)))
    }
}
