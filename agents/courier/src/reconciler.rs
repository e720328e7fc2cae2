//! The delivery reconciler resolves the eventually-consistent outcome of
//! each send from provider status callbacks.

use std::sync::Arc;

use eyre::Result;
use lapin::Channel;
use prometheus::IntCounterVec;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, instrument, instrument::Instrumented, warn, Instrument};

use sengine_base::broker::{consume, ConsumeSpec, INBOX_EXCHANGE, STATUS_QUEUE, STATUS_RK};
use sengine_base::CoreMetrics;
use sengine_core::{
    coarse, coarse_delivery_status, DripContactStatus, EventKind, ScheduleStatus, StatusEvent,
};

use crate::db::CourierDb;
use crate::webhook::WebhookProducer;

const STATUS_PREFETCH: u16 = 50;

pub(crate) struct Reconciler {
    db: CourierDb,
    webhooks: WebhookProducer,
    processed: IntCounterVec,
}

/// Spawn the `inbox.status` consumer.
pub fn spawn_reconciler(
    channel: Channel,
    db: CourierDb,
    webhooks: WebhookProducer,
    metrics: &CoreMetrics,
    shutdown: watch::Receiver<bool>,
) -> Instrumented<JoinHandle<Result<()>>> {
    let reconciler = Arc::new(Reconciler::new(db, webhooks, metrics));
    let spec = ConsumeSpec {
        queue: STATUS_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: STATUS_RK,
        prefetch: STATUS_PREFETCH,
    };
    tokio::spawn(async move {
        consume(channel, spec, shutdown, move |data| {
            let reconciler = reconciler.clone();
            async move { reconciler.handle(data).await }
        })
        .await
    })
    .instrument(info_span!("DeliveryReconciler"))
}

impl Reconciler {
    pub(crate) fn new(db: CourierDb, webhooks: WebhookProducer, metrics: &CoreMetrics) -> Self {
        Self {
            db,
            webhooks,
            processed: metrics.messages_processed_count(),
        }
    }

    /// Always resolves to ack: the provider resends reports, and a missed
    /// callback is not fatal. Errors are logged, never propagated into the
    /// broker retry path.
    async fn handle(&self, data: Vec<u8>) -> Result<()> {
        let event: StatusEvent = match serde_json::from_slice(&data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed status event");
                self.processed
                    .with_label_values(&[STATUS_QUEUE, "dropped"])
                    .inc();
                return Ok(());
            }
        };
        let outcome = match self.apply(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "status reconcile failed; acking, the provider will resend");
                "error"
            }
        };
        self.processed
            .with_label_values(&[STATUS_QUEUE, outcome])
            .inc();
        Ok(())
    }

    #[instrument(skip(self, event), fields(sid = %event.data.message_sid, status = %event.data.status))]
    pub(crate) async fn apply(&self, event: StatusEvent) -> Result<&'static str> {
        let report = event.data;

        // The tracking token is the cheaper, indexed lookup; the provider id
        // covers callbacks that lost the token on the way through.
        let message = match &report.b_ref {
            Some(b_ref) => self.db.message_by_b_ref(b_ref).await?,
            None => None,
        };
        let message = match message {
            Some(found) => Some(found),
            None => self.db.message_by_provider_id(&report.message_sid).await?,
        };
        let Some(message) = message else {
            debug!("no message for status callback, dropping");
            return Ok("unmatched");
        };

        let status_text = report.status.to_lowercase();
        let coarse_status = coarse_delivery_status(&status_text);
        let now = OffsetDateTime::now_utc();
        self.db
            .update_delivery_status(
                message.id,
                coarse_status,
                &status_text,
                report.error_code.as_deref(),
                report.error_message.as_deref(),
                now,
            )
            .await?;

        // Terminal outcomes propagate to the drip bookkeeping rows and fan
        // out to subscribers.
        match coarse_status {
            Some(coarse::DELIVERED) => {
                if message.is_drip {
                    self.db
                        .mark_scheduled_delivery_outcome(message.id, ScheduleStatus::Delivered)
                        .await?;
                    self.db
                        .mark_drip_contact_delivery_outcome(message.id, DripContactStatus::Delivered)
                        .await?;
                }
                self.fan_out(&message, EventKind::MessageDelivered, &status_text, now);
            }
            Some(coarse::FAILED) | Some(coarse::UNDELIVERED) => {
                if message.is_drip {
                    self.db
                        .mark_scheduled_delivery_outcome(message.id, ScheduleStatus::Failed)
                        .await?;
                    self.db
                        .mark_drip_contact_delivery_outcome(message.id, DripContactStatus::Failed)
                        .await?;
                }
                self.fan_out(&message, EventKind::MessageFailed, &status_text, now);
            }
            _ => {}
        }
        Ok("reconciled")
    }

    fn fan_out(
        &self,
        message: &crate::db::entities::message::Model,
        event: EventKind,
        status: &str,
        now: OffsetDateTime,
    ) {
        let webhooks = self.webhooks.clone();
        let data = serde_json::json!({
            "message_id": message.id,
            "b_ref": message.b_ref,
            "provider_message_id": message.provider_message_id,
            "delivery_status": status,
        });
        let (user_id, workspace_id) = (message.user_id, message.workspace_id);
        tokio::spawn(async move {
            webhooks.publish(user_id, workspace_id, event, data, now).await;
        });
    }
}
