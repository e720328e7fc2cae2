//! The inbound ingestor persists incoming messages, maintains contact
//! opt-in/opt-out state, and notifies the realtime layer.

use std::sync::Arc;

use eyre::Result;
use lapin::Channel;
use prometheus::IntCounterVec;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, instrument, instrument::Instrumented, warn, Instrument};

use sengine_base::broker::{
    consume, ConsumeSpec, Publisher, INBOUND_QUEUE, INBOUND_RK, INBOX_EXCHANGE, NOTIFY_RK,
};
use sengine_base::CoreMetrics;
use sengine_core::{keywords, phone, tokens, EventKind, InboundEvent, NotifyEvent};

use crate::db::{CourierDb, StorableInboundMessage};
use crate::webhook::WebhookProducer;

const INBOUND_PREFETCH: u16 = 50;

pub(crate) struct Ingestor {
    db: CourierDb,
    broker: Arc<dyn Publisher>,
    webhooks: WebhookProducer,
    processed: IntCounterVec,
}

/// Spawn the `inbox.inbound` consumer.
pub fn spawn_ingestor(
    channel: Channel,
    db: CourierDb,
    broker: Arc<dyn Publisher>,
    webhooks: WebhookProducer,
    metrics: &CoreMetrics,
    shutdown: watch::Receiver<bool>,
) -> Instrumented<JoinHandle<Result<()>>> {
    let ingestor = Arc::new(Ingestor::new(db, broker, webhooks, metrics));
    let spec = ConsumeSpec {
        queue: INBOUND_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: INBOUND_RK,
        prefetch: INBOUND_PREFETCH,
    };
    tokio::spawn(async move {
        consume(channel, spec, shutdown, move |data| {
            let ingestor = ingestor.clone();
            async move { ingestor.handle(data).await }
        })
        .await
    })
    .instrument(info_span!("InboundIngestor"))
}

impl Ingestor {
    pub(crate) fn new(
        db: CourierDb,
        broker: Arc<dyn Publisher>,
        webhooks: WebhookProducer,
        metrics: &CoreMetrics,
    ) -> Self {
        Self {
            db,
            broker,
            webhooks,
            processed: metrics.messages_processed_count(),
        }
    }

    async fn handle(&self, data: Vec<u8>) -> Result<()> {
        let event: InboundEvent = match serde_json::from_slice(&data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed inbound event");
                self.processed
                    .with_label_values(&[INBOUND_QUEUE, "dropped"])
                    .inc();
                return Ok(());
            }
        };
        let outcome = self.ingest(event).await?;
        self.processed
            .with_label_values(&[INBOUND_QUEUE, outcome])
            .inc();
        Ok(())
    }

    #[instrument(skip(self, event), fields(sid = %event.data.message_sid))]
    pub(crate) async fn ingest(&self, event: InboundEvent) -> Result<&'static str> {
        let inbound = event.data;

        // Resolve which provisioned number this arrived on; traffic to
        // numbers we do not hold is dropped, not retried.
        let Some(receiving) = self.db.user_number_by_phone(&inbound.to_number).await? else {
            warn!(to = %inbound.to_number, "inbound for unknown number, dropping");
            return Ok("unmatched");
        };
        let Some(user) = self.db.user_by_id(receiving.user_id).await? else {
            warn!(user_id = receiving.user_id, "number has no user, dropping");
            return Ok("unmatched");
        };

        let now = OffsetDateTime::now_utc();
        let from = phone::normalize_e164(&inbound.from_number);
        let contact = self
            .db
            .find_or_create_contact(user.id, user.workspace_id, &from, now)
            .await?;

        // Keyword handling precedes persistence so the stored contact state
        // reflects this message.
        if keywords::is_opt_out(&inbound.body) {
            info!(contact_id = contact.id, "contact opted out");
            self.db.set_contact_opt_out(contact.id, true, now).await?;
            self.db.add_opt_out(user.id, &from, now).await?;
            self.fan_out(
                user.id,
                user.workspace_id,
                EventKind::ContactOptout,
                serde_json::json!({ "contact_id": contact.id, "phone": from }),
                now,
            )
            .await;
        } else if keywords::is_opt_in(&inbound.body) {
            info!(contact_id = contact.id, "contact opted back in");
            self.db.set_contact_opt_out(contact.id, false, now).await?;
            self.db.remove_opt_out(user.id, &from).await?;
            self.fan_out(
                user.id,
                user.workspace_id,
                EventKind::ContactOptin,
                serde_json::json!({ "contact_id": contact.id, "phone": from }),
                now,
            )
            .await;
        }

        let uid = tokens::mint_uid();
        let message_id = self
            .db
            .insert_inbound_message(StorableInboundMessage {
                uid: &uid,
                provider_message_id: &inbound.message_sid,
                from_number: &from,
                to_number: &receiving.phone,
                body: &inbound.body,
                media_url: inbound.media_url.as_deref(),
                num_media: inbound.num_media,
                user_id: user.id,
                workspace_id: user.workspace_id,
                contact_id: contact.id,
                now,
            })
            .await?;

        // Inbound traffic reopens the conversation.
        self.db
            .touch_contact_last_message(contact.id, &inbound.body, now, true)
            .await?;

        self.fan_out(
            user.id,
            user.workspace_id,
            EventKind::MessageInbound,
            serde_json::json!({
                "message_id": message_id,
                "contact_id": contact.id,
                "from": from,
                "body": inbound.body,
            }),
            now,
        )
        .await;

        // Realtime notification with the fresh unread badge.
        let unread = self.db.unread_count(user.id).await?;
        let notify = NotifyEvent {
            event: "message:new".to_string(),
            user_id: user.id,
            workspace_id: user.workspace_id,
            contact_id: contact.id,
            message_id,
            unread_count: unread,
        };
        if !self
            .broker
            .publish_value(INBOX_EXCHANGE, NOTIFY_RK, &uid, serde_json::to_value(&notify)?)
            .await?
        {
            debug!("broker refused notify publish");
        }

        Ok("ingested")
    }

    // Awaited, not spawned: opt-out/opt-in events for one contact must be
    // enqueued in message order. `publish` never fails the ingest path.
    async fn fan_out(
        &self,
        user_id: i64,
        workspace_id: i64,
        event: EventKind,
        data: serde_json::Value,
        now: OffsetDateTime,
    ) {
        self.webhooks
            .publish(user_id, workspace_id, event, data, now)
            .await;
    }
}
