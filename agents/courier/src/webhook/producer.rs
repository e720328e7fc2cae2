use std::sync::Arc;

use eyre::Result;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use sengine_base::broker::{Publisher, INBOX_EXCHANGE, WEBHOOK_RK};
use sengine_core::{EventKind, WebhookDispatchJob, WebhookEnvelope};

use crate::db::CourierDb;

/// Matches subscriptions for an event and enqueues one dispatch job per
/// subscriber, with the delivery row inserted first so history exists even
/// if the broker publish is lost.
#[derive(Clone)]
pub struct WebhookProducer {
    db: CourierDb,
    broker: Arc<dyn Publisher>,
}

impl WebhookProducer {
    /// Build a producer over the shared broker connection.
    pub fn new(db: CourierDb, broker: Arc<dyn Publisher>) -> Self {
        Self { db, broker }
    }

    /// Fan an event out to every matching subscription.
    ///
    /// Failures are logged, not propagated: webhook fan-out must never fail
    /// the send or ingest path that triggered it.
    #[instrument(skip(self, data), fields(event = %event))]
    pub async fn publish(
        &self,
        user_id: i64,
        workspace_id: i64,
        event: EventKind,
        data: serde_json::Value,
        now: OffsetDateTime,
    ) {
        if let Err(e) = self.try_publish(user_id, workspace_id, event, data, now).await {
            warn!(error = %e, "webhook fan-out failed");
        }
    }

    async fn try_publish(
        &self,
        user_id: i64,
        workspace_id: i64,
        event: EventKind,
        data: serde_json::Value,
        now: OffsetDateTime,
    ) -> Result<()> {
        let subscriptions = self
            .db
            .webhooks_for_event(user_id, workspace_id, &event.to_string())
            .await?;
        if subscriptions.is_empty() {
            return Ok(());
        }

        for subscription in subscriptions {
            let envelope = WebhookEnvelope::new(event, now, data.clone());
            let delivery_id = self
                .db
                .insert_webhook_delivery(subscription.id, &envelope, now)
                .await?;
            let job = WebhookDispatchJob {
                delivery_id,
                webhook_id: subscription.id,
            };
            let accepted = self
                .broker
                .publish_value(
                    INBOX_EXCHANGE,
                    WEBHOOK_RK,
                    &envelope.event_id,
                    serde_json::to_value(&job)?,
                )
                .await?;
            if !accepted {
                warn!(delivery_id, "broker refused webhook job publish");
            } else {
                debug!(delivery_id, webhook_id = subscription.id, "webhook job enqueued");
            }
        }
        Ok(())
    }
}
