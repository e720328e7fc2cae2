use eyre::Result;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use time::OffsetDateTime;
use tracing::instrument;

use sengine_core::{DripContactStatus, ScheduleStatus};

use super::entities::{drip_contact, scheduled_message};
use super::CourierDb;

impl CourierDb {
    /// Pending rows due within the lead window, oldest first.
    #[instrument(skip(self))]
    pub async fn due_scheduled(
        &self,
        cutoff: OffsetDateTime,
        limit: u64,
    ) -> Result<Vec<scheduled_message::Model>> {
        Ok(scheduled_message::Entity::find()
            .filter(scheduled_message::Column::Status.eq(i16::from(ScheduleStatus::Pending)))
            .filter(scheduled_message::Column::ScheduledAt.lte(cutoff))
            .order_by_asc(scheduled_message::Column::ScheduledAt)
            .limit(limit)
            .all(self.reader())
            .await?)
    }

    /// One scheduled row by id.
    pub async fn scheduled_by_id(&self, id: i64) -> Result<Option<scheduled_message::Model>> {
        Ok(scheduled_message::Entity::find_by_id(id)
            .one(self.reader())
            .await?)
    }

    /// Flip successfully published rows from Pending to Queued.
    ///
    /// Gated on `status = Pending` so a row cancelled between the select and
    /// this update is not clobbered. Returns the number of rows moved.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn mark_scheduled_queued(
        &self,
        ids: &[i64],
        queued_at: OffsetDateTime,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = scheduled_message::Entity::update_many()
            .col_expr(
                scheduled_message::Column::Status,
                Expr::value(i16::from(ScheduleStatus::Queued)),
            )
            .col_expr(scheduled_message::Column::QueuedAt, Expr::value(queued_at))
            .filter(scheduled_message::Column::Id.is_in(ids.to_vec()))
            .filter(scheduled_message::Column::Status.eq(i16::from(ScheduleStatus::Pending)))
            .exec(self.writer())
            .await?;
        Ok(res.rows_affected)
    }

    /// Record a completed send on the scheduled row.
    pub async fn mark_scheduled_sent(
        &self,
        id: i64,
        message_id: i64,
        provider_message_id: &str,
        sent_at: OffsetDateTime,
    ) -> Result<()> {
        scheduled_message::Entity::update_many()
            .col_expr(
                scheduled_message::Column::Status,
                Expr::value(i16::from(ScheduleStatus::Sent)),
            )
            .col_expr(scheduled_message::Column::SentAt, Expr::value(sent_at))
            .col_expr(scheduled_message::Column::MessageId, Expr::value(message_id))
            .col_expr(
                scheduled_message::Column::ProviderMessageId,
                Expr::value(provider_message_id),
            )
            .filter(scheduled_message::Column::Id.eq(id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Record a terminal failure on the scheduled row.
    pub async fn mark_scheduled_failed(&self, id: i64, reason: &str) -> Result<()> {
        scheduled_message::Entity::update_many()
            .col_expr(
                scheduled_message::Column::Status,
                Expr::value(i16::from(ScheduleStatus::Failed)),
            )
            .col_expr(
                scheduled_message::Column::ErrorMessage,
                Expr::value(reason),
            )
            .filter(scheduled_message::Column::Id.eq(id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Move a Sent row to its provider-confirmed terminal state.
    pub async fn mark_scheduled_delivery_outcome(
        &self,
        message_id: i64,
        status: ScheduleStatus,
    ) -> Result<()> {
        scheduled_message::Entity::update_many()
            .col_expr(
                scheduled_message::Column::Status,
                Expr::value(i16::from(status)),
            )
            .filter(scheduled_message::Column::MessageId.eq(message_id))
            .filter(scheduled_message::Column::Status.eq(i16::from(ScheduleStatus::Sent)))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Rows that went to the broker but never came back: still Queued after
    /// the broker TTL has long passed. Operator-visible via the warn log.
    pub async fn stale_queued_count(&self, queued_before: OffsetDateTime) -> Result<u64> {
        Ok(scheduled_message::Entity::find()
            .filter(scheduled_message::Column::Status.eq(i16::from(ScheduleStatus::Queued)))
            .filter(scheduled_message::Column::QueuedAt.lt(queued_before))
            .count(self.reader())
            .await?)
    }

    /// Update the per-enrollment tracking row after a successful send.
    pub async fn mark_drip_contact_sent(
        &self,
        id: i64,
        message_id: i64,
        b_ref: &str,
        sent_at: OffsetDateTime,
    ) -> Result<()> {
        drip_contact::Entity::update_many()
            .col_expr(
                drip_contact::Column::Status,
                Expr::value(i16::from(DripContactStatus::Sent)),
            )
            .col_expr(drip_contact::Column::SentAt, Expr::value(sent_at))
            .col_expr(drip_contact::Column::MessageId, Expr::value(message_id))
            .col_expr(drip_contact::Column::BRef, Expr::value(b_ref))
            .filter(drip_contact::Column::Id.eq(id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Update the per-enrollment tracking row after a failed or skipped send.
    pub async fn mark_drip_contact_failed(
        &self,
        id: i64,
        status: DripContactStatus,
        reason: &str,
    ) -> Result<()> {
        drip_contact::Entity::update_many()
            .col_expr(drip_contact::Column::Status, Expr::value(i16::from(status)))
            .col_expr(drip_contact::Column::ErrorMessage, Expr::value(reason))
            .filter(drip_contact::Column::Id.eq(id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Move a drip tracking row to its provider-confirmed terminal state.
    pub async fn mark_drip_contact_delivery_outcome(
        &self,
        message_id: i64,
        status: DripContactStatus,
    ) -> Result<()> {
        drip_contact::Entity::update_many()
            .col_expr(drip_contact::Column::Status, Expr::value(i16::from(status)))
            .filter(drip_contact::Column::MessageId.eq(message_id))
            .filter(drip_contact::Column::Status.eq(i16::from(DripContactStatus::Sent)))
            .exec(self.writer())
            .await?;
        Ok(())
    }
}
