use std::sync::Arc;

use eyre::Result;
use prometheus::IntGaugeVec;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, instrument, instrument::Instrumented, warn, Instrument};

use sengine_base::broker::{Broker, DRIP_EXCHANGE, DRIP_SEND_RK};
use sengine_base::CoreMetrics;
use sengine_core::DripSendJob;

use crate::db::entities::scheduled_message;
use crate::db::CourierDb;
use crate::settings::DripSettings;

/// Drains due `scheduled_messages` rows into the broker at a bounded lead
/// time ahead of `scheduled_at`.
///
/// Strictly sequential: one cycle at a time, guarded by `in_progress`, and
/// exactly one instance may run fleet-wide (a duplicate double-queues). The
/// broker is only a short-term hand-off buffer; rows published here flip
/// Pending → Queued only after the broker confirmed the publish.
pub struct PreQueueScheduler {
    db: CourierDb,
    broker: Arc<Broker>,
    settings: DripSettings,
    batch_gauge: IntGaugeVec,
    in_progress: bool,
}

impl PreQueueScheduler {
    /// Build the scheduler over the shared broker connection.
    pub fn new(
        db: CourierDb,
        broker: Arc<Broker>,
        settings: DripSettings,
        metrics: &CoreMetrics,
    ) -> Self {
        Self {
            db,
            broker,
            settings,
            batch_gauge: metrics.prequeue_batch_size(),
            in_progress: false,
        }
    }

    /// Spawn the ticker loop.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("PreQueueScheduler");
        tokio::spawn(self.main_loop(shutdown)).instrument(span)
    }

    async fn main_loop(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.settings.interval, lead = ?self.settings.lead_window, "pre-queue scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("pre-queue scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // A cycle failure is logged and the next tick retries;
                    // rows left Pending are picked up again.
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "pre-queue cycle failed");
                    }
                }
            }
        }
    }

    /// One cycle, extracted from the loop for clarity and testing.
    #[instrument(skip(self))]
    async fn tick(&mut self) -> Result<()> {
        if self.in_progress {
            warn!("previous pre-queue cycle still running, skipping");
            return Ok(());
        }
        if !self.broker.is_connected() {
            warn!("broker not connected, skipping pre-queue cycle");
            return Ok(());
        }

        self.in_progress = true;
        let result = self.cycle().await;
        self.in_progress = false;
        result
    }

    async fn cycle(&mut self) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let cutoff = now + self.settings.lead_window;
        let due = self.db.due_scheduled(cutoff, self.settings.batch_size).await?;
        self.batch_gauge
            .with_label_values(&["selected"])
            .set(due.len() as i64);
        if due.is_empty() {
            debug!("no rows due within the lead window");
        } else {
            let mut published_ids = Vec::with_capacity(due.len());
            for row in &due {
                let job = build_job(row, now);
                match self
                    .broker
                    .publish_json(DRIP_EXCHANGE, DRIP_SEND_RK, &row.id.to_string(), &job)
                    .await
                {
                    Ok(true) => published_ids.push(row.id),
                    // A refused publish (broker buffer full) leaves the row
                    // Pending; the next cycle retries it.
                    Ok(false) => warn!(id = row.id, "broker refused publish"),
                    Err(e) => warn!(id = row.id, error = %e, "publish failed"),
                }
            }
            self.batch_gauge
                .with_label_values(&["published"])
                .set(published_ids.len() as i64);

            let moved = self.db.mark_scheduled_queued(&published_ids, now).await?;
            info!(
                selected = due.len(),
                published = published_ids.len(),
                moved,
                "pre-queue cycle complete"
            );
        }

        // Rows that went Queued but never reached a terminal state are stuck
        // once the broker TTL has passed; surface them for the operator.
        let stale_cutoff = now - (self.settings.lead_window * 2);
        let stale = self.db.stale_queued_count(stale_cutoff).await?;
        if stale > 0 {
            warn!(stale, "rows stuck in Queued past the broker TTL; manual requeue needed");
        }
        Ok(())
    }
}

fn build_job(row: &scheduled_message::Model, now: OffsetDateTime) -> DripSendJob {
    DripSendJob {
        scheduled_message_id: row.id,
        drip_contact_id: row.drip_contact_id,
        user_id: row.user_id,
        workspace_id: row.workspace_id,
        contact_id: row.contact_id,
        drip_id: row.drip_id,
        campaign_id: row.campaign_id,
        from_number: row.from_number.clone(),
        to_number: row.to_number.clone(),
        sid: None,
        message: row.body.clone(),
        media_url: row.media_url.clone(),
        scheduled_at: row.scheduled_at,
        queued_at: now,
        is_load_test: false,
        credit_cost: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    fn row(id: i64) -> scheduled_message::Model {
        scheduled_message::Model {
            id,
            user_id: 3,
            workspace_id: 4,
            contact_id: 5,
            drip_id: 6,
            campaign_id: 7,
            drip_contact_id: 22,
            from_number: None,
            to_number: "+15551112222".into(),
            body: "hi [first]".into(),
            media_url: None,
            scheduled_at: datetime!(2024-05-01 12:00 UTC),
            status: 0,
            retry_count: 0,
            queued_at: None,
            sent_at: None,
            error_message: None,
            message_id: None,
            provider_message_id: None,
        }
    }

    #[test]
    fn job_mirrors_the_row_and_stamps_queued_at() {
        let now = datetime!(2024-05-01 11:46 UTC);
        let job = build_job(&row(11), now);
        assert_eq!(job.scheduled_message_id, 11);
        assert_eq!(job.drip_contact_id, 22);
        assert_eq!(job.scheduled_at, datetime!(2024-05-01 12:00 UTC));
        assert_eq!(job.queued_at, now);
        assert!(!job.is_load_test);
    }
}
