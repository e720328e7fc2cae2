use eyre::Result;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter};
use time::OffsetDateTime;
use tracing::{instrument, warn};

use super::entities::{contact, opt_out};
use super::CourierDb;

impl CourierDb {
    /// One contact by id, including soft-deleted rows (callers check
    /// `deleted_at` themselves, the distinction matters for failure reasons).
    pub async fn contact_by_id(&self, id: i64) -> Result<Option<contact::Model>> {
        Ok(contact::Entity::find_by_id(id).one(self.reader()).await?)
    }

    /// Find the contact for an inbound sender, creating it on first contact.
    #[instrument(skip(self))]
    pub async fn find_or_create_contact(
        &self,
        user_id: i64,
        workspace_id: i64,
        phone: &str,
        now: OffsetDateTime,
    ) -> Result<contact::Model> {
        let existing = contact::Entity::find()
            .filter(contact::Column::UserId.eq(user_id))
            .filter(contact::Column::Phone.eq(phone))
            .filter(contact::Column::DeletedAt.is_null())
            .one(self.reader())
            .await?;
        if let Some(found) = existing {
            return Ok(found);
        }

        let fresh = contact::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            workspace_id: Set(workspace_id),
            phone: Set(phone.to_string()),
            first_name: Set(None),
            last_name: Set(None),
            email: Set(None),
            opted_out: Set(false),
            is_block: Set(false),
            last_message: Set(None),
            last_message_at: Set(None),
            open_chat: Set(true),
            archive: Set(false),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        match fresh.insert(self.writer()).await {
            Ok(created) => Ok(created),
            Err(insert_err) => {
                // Two inbound messages from a new number can race the insert;
                // the loser re-reads the winner's row.
                let raced = contact::Entity::find()
                    .filter(contact::Column::UserId.eq(user_id))
                    .filter(contact::Column::Phone.eq(phone))
                    .filter(contact::Column::DeletedAt.is_null())
                    .one(self.reader())
                    .await?;
                match raced {
                    Some(found) => {
                        warn!(phone, "contact insert raced, reusing existing row");
                        Ok(found)
                    }
                    None => Err(insert_err.into()),
                }
            }
        }
    }

    /// Flip the contact's opt-out flag.
    pub async fn set_contact_opt_out(
        &self,
        contact_id: i64,
        opted_out: bool,
        now: OffsetDateTime,
    ) -> Result<()> {
        contact::Entity::update_many()
            .col_expr(contact::Column::OptedOut, Expr::value(opted_out))
            .col_expr(contact::Column::UpdatedAt, Expr::value(now))
            .filter(contact::Column::Id.eq(contact_id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Record the latest message on the contact; optionally reopen the chat
    /// thread (inbound traffic un-archives the conversation).
    pub async fn touch_contact_last_message(
        &self,
        contact_id: i64,
        body: &str,
        now: OffsetDateTime,
        reopen: bool,
    ) -> Result<()> {
        let mut update = contact::Entity::update_many()
            .col_expr(contact::Column::LastMessage, Expr::value(body))
            .col_expr(contact::Column::LastMessageAt, Expr::value(now))
            .col_expr(contact::Column::UpdatedAt, Expr::value(now))
            .filter(contact::Column::Id.eq(contact_id));
        if reopen {
            update = update
                .col_expr(contact::Column::OpenChat, Expr::value(true))
                .col_expr(contact::Column::Archive, Expr::value(false));
        }
        update.exec(self.writer()).await?;
        Ok(())
    }

    /// Add a deny-list entry for (user, normalized phone), idempotently.
    pub async fn add_opt_out(&self, user_id: i64, phone: &str, now: OffsetDateTime) -> Result<()> {
        let existing = opt_out::Entity::find()
            .filter(opt_out::Column::UserId.eq(user_id))
            .filter(opt_out::Column::Phone.eq(phone))
            .one(self.reader())
            .await?;
        if existing.is_some() {
            return Ok(());
        }
        opt_out::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            phone: Set(phone.to_string()),
            created_at: Set(now),
        }
        .insert(self.writer())
        .await?;
        Ok(())
    }

    /// Remove the deny-list entry for (user, normalized phone).
    pub async fn remove_opt_out(&self, user_id: i64, phone: &str) -> Result<()> {
        if let Some(entry) = opt_out::Entity::find()
            .filter(opt_out::Column::UserId.eq(user_id))
            .filter(opt_out::Column::Phone.eq(phone))
            .one(self.reader())
            .await?
        {
            entry.delete(self.writer()).await?;
        }
        Ok(())
    }
}
