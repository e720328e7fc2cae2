use eyre::Result;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use time::OffsetDateTime;
use tracing::instrument;

use sengine_core::{coarse, Direction, MessageKind};

use super::entities::message;
use super::CourierDb;

/// An outbound `messages` row, built after the gateway call so the provider
/// id is present in the very first write.
#[derive(Clone, Debug)]
pub struct StorableOutboundMessage<'a> {
    pub uid: &'a str,
    pub b_ref: &'a str,
    pub provider_message_id: &'a str,
    pub from_number: &'a str,
    pub to_number: &'a str,
    pub body: &'a str,
    pub media_url: Option<&'a str>,
    pub delivery_status: Option<&'a str>,
    pub is_drip: bool,
    pub drip_id: Option<i64>,
    pub user_id: i64,
    pub workspace_id: i64,
    pub contact_id: i64,
    pub now: OffsetDateTime,
}

/// An inbound `messages` row.
#[derive(Clone, Debug)]
pub struct StorableInboundMessage<'a> {
    pub uid: &'a str,
    pub provider_message_id: &'a str,
    pub from_number: &'a str,
    pub to_number: &'a str,
    pub body: &'a str,
    pub media_url: Option<&'a str>,
    pub num_media: u32,
    pub user_id: i64,
    pub workspace_id: i64,
    pub contact_id: i64,
    pub now: OffsetDateTime,
}

impl CourierDb {
    /// One message row by id.
    pub async fn message_by_id(&self, id: i64) -> Result<Option<message::Model>> {
        Ok(message::Entity::find_by_id(id).one(self.reader()).await?)
    }

    /// Look up by our tracking token.
    pub async fn message_by_b_ref(&self, b_ref: &str) -> Result<Option<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::BRef.eq(b_ref))
            .one(self.reader())
            .await?)
    }

    /// Look up by the provider's message id.
    pub async fn message_by_provider_id(&self, sid: &str) -> Result<Option<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::ProviderMessageId.eq(sid))
            .one(self.reader())
            .await?)
    }

    /// Insert the permanent record of a gateway-accepted outbound send.
    #[instrument(skip_all, fields(b_ref = storable.b_ref))]
    pub async fn insert_outbound_message(
        &self,
        storable: StorableOutboundMessage<'_>,
    ) -> Result<i64> {
        let media_count = u32::from(storable.media_url.is_some());
        let model = message::ActiveModel {
            id: NotSet,
            uid: Set(storable.uid.to_string()),
            b_ref: Set(Some(storable.b_ref.to_string())),
            provider_message_id: Set(Some(storable.provider_message_id.to_string())),
            from_number: Set(storable.from_number.to_string()),
            to_number: Set(storable.to_number.to_string()),
            body: Set(storable.body.to_string()),
            media_url: Set(storable.media_url.map(str::to_string)),
            status: Set(coarse::SENT),
            delivery_status: Set(Some(
                storable.delivery_status.unwrap_or("sent").to_string(),
            )),
            direction: Set(Direction::Outbound.as_str().to_string()),
            is_drip: Set(storable.is_drip),
            drip_id: Set(storable.drip_id),
            user_id: Set(storable.user_id),
            workspace_id: Set(storable.workspace_id),
            contact_id: Set(storable.contact_id),
            message_type: Set(MessageKind::from_media_count(media_count) as i16),
            is_charged: Set(true),
            is_read: Set(true),
            error_code: Set(None),
            error_message: Set(None),
            created_at: Set(storable.now),
            updated_at: Set(storable.now),
        };
        Ok(model.insert(self.writer()).await?.id)
    }

    /// Insert an inbound message row, unread.
    #[instrument(skip_all, fields(sid = storable.provider_message_id))]
    pub async fn insert_inbound_message(
        &self,
        storable: StorableInboundMessage<'_>,
    ) -> Result<i64> {
        let model = message::ActiveModel {
            id: NotSet,
            uid: Set(storable.uid.to_string()),
            b_ref: Set(None),
            provider_message_id: Set(Some(storable.provider_message_id.to_string())),
            from_number: Set(storable.from_number.to_string()),
            to_number: Set(storable.to_number.to_string()),
            body: Set(storable.body.to_string()),
            media_url: Set(storable.media_url.map(str::to_string)),
            status: Set(coarse::DELIVERED),
            delivery_status: Set(Some("received".to_string())),
            direction: Set(Direction::Inbound.as_str().to_string()),
            is_drip: Set(false),
            drip_id: Set(None),
            user_id: Set(storable.user_id),
            workspace_id: Set(storable.workspace_id),
            contact_id: Set(storable.contact_id),
            message_type: Set(MessageKind::from_media_count(storable.num_media) as i16),
            is_charged: Set(false),
            is_read: Set(false),
            error_code: Set(None),
            error_message: Set(None),
            created_at: Set(storable.now),
            updated_at: Set(storable.now),
        };
        Ok(model.insert(self.writer()).await?.id)
    }

    /// Claim the send of a pre-created message row by writing the provider id
    /// in a single statement gated on it being unset.
    ///
    /// Returns false when another dispatcher won the race; the caller must
    /// treat the send as a duplicate and compensate anything it charged.
    #[instrument(skip(self))]
    pub async fn claim_provider_message_id(
        &self,
        id: i64,
        provider_message_id: &str,
        delivery_status: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<bool> {
        let res = message::Entity::update_many()
            .col_expr(
                message::Column::ProviderMessageId,
                Expr::value(provider_message_id),
            )
            .col_expr(message::Column::Status, Expr::value(coarse::SENT))
            .col_expr(
                message::Column::DeliveryStatus,
                Expr::value(delivery_status.unwrap_or("sent")),
            )
            .col_expr(message::Column::IsCharged, Expr::value(true))
            .col_expr(message::Column::UpdatedAt, Expr::value(now))
            .filter(message::Column::Id.eq(id))
            .filter(message::Column::ProviderMessageId.is_null())
            .exec(self.writer())
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Record a gateway failure on a pre-created message row.
    pub async fn mark_message_failed(
        &self,
        id: i64,
        error_code: Option<&str>,
        error_message: &str,
        now: OffsetDateTime,
    ) -> Result<()> {
        message::Entity::update_many()
            .col_expr(message::Column::Status, Expr::value(coarse::FAILED))
            .col_expr(message::Column::DeliveryStatus, Expr::value("failed"))
            .col_expr(message::Column::ErrorCode, Expr::value(error_code))
            .col_expr(message::Column::ErrorMessage, Expr::value(error_message))
            .col_expr(message::Column::UpdatedAt, Expr::value(now))
            .filter(message::Column::Id.eq(id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Apply a provider delivery report. Unknown provider statuses update the
    /// textual column only.
    #[instrument(skip(self))]
    pub async fn update_delivery_status(
        &self,
        id: i64,
        coarse_status: Option<i16>,
        delivery_status: &str,
        error_code: Option<&str>,
        error_message: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<()> {
        let mut update = message::Entity::update_many()
            .col_expr(
                message::Column::DeliveryStatus,
                Expr::value(delivery_status),
            )
            .col_expr(message::Column::UpdatedAt, Expr::value(now))
            .filter(message::Column::Id.eq(id));
        if let Some(status) = coarse_status {
            update = update.col_expr(message::Column::Status, Expr::value(status));
        }
        if let Some(code) = error_code {
            update = update.col_expr(message::Column::ErrorCode, Expr::value(code));
        }
        if let Some(msg) = error_message {
            update = update.col_expr(message::Column::ErrorMessage, Expr::value(msg));
        }
        update.exec(self.writer()).await?;
        Ok(())
    }

    /// Unread inbound messages for a user, for the realtime badge.
    pub async fn unread_count(&self, user_id: i64) -> Result<i64> {
        Ok(message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .filter(message::Column::Direction.eq(Direction::Inbound.as_str()))
            .filter(message::Column::IsRead.eq(false))
            .count(self.reader())
            .await? as i64)
    }
}
