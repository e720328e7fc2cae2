use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use lapin::Channel;
use prometheus::IntCounterVec;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info_span, instrument, warn, Instrument};

use sengine_base::broker::{consume, ConsumeSpec, INBOX_EXCHANGE, WEBHOOK_QUEUE, WEBHOOK_RK};
use sengine_base::CoreMetrics;
use sengine_core::{signing, WebhookDispatchJob};

use crate::db::entities::webhook_delivery::DELIVERY_PENDING;
use crate::db::CourierDb;

const POST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 3;
const RESPONSE_BODY_LIMIT: usize = 5000;
const WEBHOOK_USER_AGENT: &str = "Sengine-Webhook/1.0";
const WEBHOOK_PREFETCH: u16 = 20;

struct WebhookDispatcher {
    db: CourierDb,
    http: reqwest::Client,
    posts: IntCounterVec,
}

/// Spawn the `inbox.webhook` consumer.
pub fn spawn_webhook_dispatcher(
    channel: Channel,
    db: CourierDb,
    metrics: &CoreMetrics,
    shutdown: watch::Receiver<bool>,
) -> Result<tracing::instrument::Instrumented<JoinHandle<Result<()>>>> {
    let dispatcher = Arc::new(WebhookDispatcher {
        db,
        http: reqwest::Client::builder()
            .timeout(POST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?,
        posts: metrics.webhook_posts_count(),
    });

    let spec = ConsumeSpec {
        queue: WEBHOOK_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: WEBHOOK_RK,
        prefetch: WEBHOOK_PREFETCH,
    };
    let handle = tokio::spawn(async move {
        consume(channel, spec, shutdown, move |data| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.handle(data).await }
        })
        .await
    })
    .instrument(info_span!("WebhookDispatcher"));
    Ok(handle)
}

impl WebhookDispatcher {
    /// The broker message is always acked: delivery history lives in the
    /// deliveries table and retries are user-driven, so even a storage
    /// failure while recording the attempt must not requeue the job.
    async fn handle(&self, data: Vec<u8>) -> Result<()> {
        let job: WebhookDispatchJob = match serde_json::from_slice(&data) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "dropping malformed webhook job");
                return Ok(());
            }
        };
        if let Err(e) = self.deliver(job).await {
            warn!(error = %e, "webhook delivery bookkeeping failed; acking anyway");
            self.posts.with_label_values(&["error"]).inc();
        }
        Ok(())
    }

    /// POST one signed payload and record the attempt.
    #[instrument(skip(self), fields(delivery_id = job.delivery_id))]
    async fn deliver(&self, job: WebhookDispatchJob) -> Result<()> {
        let Some(delivery) = self.db.webhook_delivery_by_id(job.delivery_id).await? else {
            warn!("delivery row vanished, dropping job");
            return Ok(());
        };
        if delivery.status != DELIVERY_PENDING {
            debug!(status = %delivery.status, "delivery already attempted, dropping");
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let Some(subscription) = self.db.webhook_by_id(job.webhook_id).await? else {
            self.db
                .record_webhook_attempt(
                    delivery.id,
                    false,
                    None,
                    None,
                    Some("webhook subscription deleted"),
                    0,
                    now,
                )
                .await?;
            return Ok(());
        };

        let signature = signing::signature_header(&subscription.secret, delivery.payload.as_bytes());
        let started = Instant::now();
        let response = self
            .http
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", WEBHOOK_USER_AGENT)
            .header("X-Webhook-Event", &delivery.event_type)
            .header("X-Webhook-Delivery", &delivery.event_id)
            .header("X-Webhook-Signature", signature)
            .body(delivery.payload.clone())
            .send()
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;
        let attempted_at = OffsetDateTime::now_utc();

        let (success, response_status, response_body, error_message) = match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let body = truncate(&body, RESPONSE_BODY_LIMIT);
                (
                    status.is_success(),
                    Some(status.as_u16() as i32),
                    Some(body),
                    (!status.is_success()).then(|| format!("endpoint returned HTTP {status}")),
                )
            }
            Err(e) => (false, None, None, Some(e.to_string())),
        };

        self.db
            .record_webhook_attempt(
                delivery.id,
                success,
                response_status,
                response_body.as_deref(),
                error_message.as_deref(),
                duration_ms,
                attempted_at,
            )
            .await?;
        self.db
            .record_webhook_parent_outcome(subscription.id, success, attempted_at)
            .await?;

        let outcome = if success { "success" } else { "failed" };
        self.posts.with_label_values(&[outcome]).inc();
        debug!(outcome, duration_ms, "webhook attempt recorded");
        Ok(())
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        body.to_string()
    } else {
        body.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truncate_caps_at_limit_on_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "é".repeat(6000);
        let cut = truncate(&long, 5000);
        assert_eq!(cut.chars().count(), 5000);
    }
}
