use eyre::Result;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use time::OffsetDateTime;
use tracing::instrument;

use sengine_core::WebhookEnvelope;

use super::entities::{webhook, webhook_delivery};
use super::CourierDb;

impl CourierDb {
    /// Active subscriptions of a user/workspace that want a given event tag.
    ///
    /// The tag filter runs in Rust: `events` is a comma-separated list and a
    /// SQL `LIKE` on it would false-positive on tag prefixes.
    pub async fn webhooks_for_event(
        &self,
        user_id: i64,
        workspace_id: i64,
        tag: &str,
    ) -> Result<Vec<webhook::Model>> {
        let subscriptions = webhook::Entity::find()
            .filter(webhook::Column::UserId.eq(user_id))
            .filter(webhook::Column::WorkspaceId.eq(workspace_id))
            .filter(webhook::Column::Status.eq(webhook::WEBHOOK_ACTIVE))
            .all(self.reader())
            .await?;
        Ok(subscriptions
            .into_iter()
            .filter(|subscription| subscription.wants_event(tag))
            .collect())
    }

    /// One subscription by id.
    pub async fn webhook_by_id(&self, id: i64) -> Result<Option<webhook::Model>> {
        Ok(webhook::Entity::find_by_id(id).one(self.reader()).await?)
    }

    /// One delivery row by id.
    pub async fn webhook_delivery_by_id(
        &self,
        id: i64,
    ) -> Result<Option<webhook_delivery::Model>> {
        Ok(webhook_delivery::Entity::find_by_id(id)
            .one(self.reader())
            .await?)
    }

    /// Insert a pending delivery row holding the signed-payload source.
    #[instrument(skip(self, envelope), fields(event = %envelope.event))]
    pub async fn insert_webhook_delivery(
        &self,
        webhook_id: i64,
        envelope: &WebhookEnvelope,
        now: OffsetDateTime,
    ) -> Result<i64> {
        let payload = serde_json::to_string(envelope)?;
        let model = webhook_delivery::ActiveModel {
            id: NotSet,
            webhook_id: Set(webhook_id),
            event_id: Set(envelope.event_id.clone()),
            event_type: Set(envelope.event.to_string()),
            payload: Set(payload),
            status: Set(webhook_delivery::DELIVERY_PENDING.to_string()),
            response_status: Set(None),
            response_body: Set(None),
            error_message: Set(None),
            duration_ms: Set(None),
            attempted_at: Set(None),
            created_at: Set(now),
        };
        Ok(model.insert(self.writer()).await?.id)
    }

    /// Record the outcome of one delivery attempt.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, response_body, error_message))]
    pub async fn record_webhook_attempt(
        &self,
        delivery_id: i64,
        success: bool,
        response_status: Option<i32>,
        response_body: Option<&str>,
        error_message: Option<&str>,
        duration_ms: i64,
        attempted_at: OffsetDateTime,
    ) -> Result<()> {
        let status = if success {
            webhook_delivery::DELIVERY_SUCCESS
        } else {
            webhook_delivery::DELIVERY_FAILED
        };
        webhook_delivery::Entity::update_many()
            .col_expr(webhook_delivery::Column::Status, Expr::value(status))
            .col_expr(
                webhook_delivery::Column::ResponseStatus,
                Expr::value(response_status),
            )
            .col_expr(
                webhook_delivery::Column::ResponseBody,
                Expr::value(response_body),
            )
            .col_expr(
                webhook_delivery::Column::ErrorMessage,
                Expr::value(error_message),
            )
            .col_expr(
                webhook_delivery::Column::DurationMs,
                Expr::value(duration_ms),
            )
            .col_expr(
                webhook_delivery::Column::AttemptedAt,
                Expr::value(attempted_at),
            )
            .filter(webhook_delivery::Column::Id.eq(delivery_id))
            .exec(self.writer())
            .await?;
        Ok(())
    }

    /// Update the parent subscription's health after an attempt: success
    /// resets the failure counter and stamps `last_triggered_at`, failure
    /// increments the counter.
    pub async fn record_webhook_parent_outcome(
        &self,
        webhook_id: i64,
        success: bool,
        now: OffsetDateTime,
    ) -> Result<()> {
        let update = webhook::Entity::update_many()
            .col_expr(webhook::Column::UpdatedAt, Expr::value(now))
            .filter(webhook::Column::Id.eq(webhook_id));
        let update = if success {
            update
                .col_expr(webhook::Column::FailureCount, Expr::value(0))
                .col_expr(webhook::Column::LastTriggeredAt, Expr::value(now))
        } else {
            update.col_expr(
                webhook::Column::FailureCount,
                Expr::col(webhook::Column::FailureCount).add(1),
            )
        };
        update.exec(self.writer()).await?;
        Ok(())
    }
}
