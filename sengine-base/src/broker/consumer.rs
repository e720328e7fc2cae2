use std::future::Future;

use eyre::{eyre, Report, Result};
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::Channel;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Delivery attempts before a message is dead-lettered.
pub const MAX_DELIVERY_ATTEMPTS: i64 = 3;

const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// What to consume and how.
#[derive(Clone, Copy, Debug)]
pub struct ConsumeSpec {
    /// Queue to consume from.
    pub queue: &'static str,
    /// Exchange retried messages are republished to.
    pub exchange: &'static str,
    /// Routing key retried messages are republished with.
    pub routing_key: &'static str,
    /// Unacked deliveries allowed in flight per consumer.
    pub prefetch: u16,
}

/// Delivery attempts already made for this message, from the retry header.
pub fn delivery_retry_count(delivery: &Delivery) -> i64 {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&ShortString::from(RETRY_COUNT_HEADER)))
        .and_then(|value| match value {
            AMQPValue::ShortShortInt(v) => Some(*v as i64),
            AMQPValue::ShortInt(v) => Some(*v as i64),
            AMQPValue::LongInt(v) => Some(*v as i64),
            AMQPValue::LongLongInt(v) => Some(*v),
            _ => None,
        })
        .unwrap_or(0)
}

/// Consume a queue with manual acks until shutdown.
///
/// The handler is invoked once per delivery. `Ok` acks. `Err` consults the
/// retry budget: under [`MAX_DELIVERY_ATTEMPTS`] the message is republished
/// with a bumped `x-retry-count` and the original acked (a plain
/// nack-requeue would redeliver the stale header), otherwise it is rejected
/// without requeue and the broker dead-letters it.
///
/// Returns when shutdown flips (after cancelling the consumer, so no new
/// deliveries arrive) or errs when the stream closes underneath us, which
/// means the connection died.
#[instrument(skip(channel, shutdown, handler), fields(queue = spec.queue))]
pub async fn consume<H, Fut>(
    channel: Channel,
    spec: ConsumeSpec,
    mut shutdown: watch::Receiver<bool>,
    handler: H,
) -> Result<()>
where
    H: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    channel
        .basic_qos(spec.prefetch, BasicQosOptions::default())
        .await?;

    let consumer_tag = format!("{}-{}", spec.queue, Uuid::new_v4().simple());
    let mut consumer = channel
        .basic_consume(
            spec.queue,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    info!(%consumer_tag, "consumer started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                channel
                    .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                    .await?;
                info!(%consumer_tag, "consumer cancelled");
                return Ok(());
            }
            next = consumer.next() => {
                let Some(delivery) = next else {
                    return Err(eyre!("consumer stream for {} closed", spec.queue));
                };
                let delivery = delivery?;
                match handler(delivery.data.clone()).await {
                    Ok(()) => delivery.ack(BasicAckOptions::default()).await?,
                    Err(e) => retry_or_dead_letter(&channel, &spec, delivery, e).await?,
                }
            }
        }
    }
}

async fn retry_or_dead_letter(
    channel: &Channel,
    spec: &ConsumeSpec,
    delivery: Delivery,
    error: Report,
) -> Result<()> {
    let attempts = delivery_retry_count(&delivery) + 1;
    if attempts >= MAX_DELIVERY_ATTEMPTS {
        warn!(
            queue = spec.queue,
            attempts,
            error = %error,
            "handler failed, dead-lettering"
        );
        delivery
            .reject(BasicRejectOptions { requeue: false })
            .await?;
        return Ok(());
    }

    debug!(queue = spec.queue, attempts, error = %error, "handler failed, requeueing");
    let mut headers = delivery
        .properties
        .headers()
        .clone()
        .unwrap_or_default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongLongInt(attempts));
    let properties = delivery.properties.clone().with_headers(headers);

    channel
        .basic_publish(
            spec.exchange,
            spec.routing_key,
            BasicPublishOptions::default(),
            &delivery.data,
            properties,
        )
        .await?
        .await?;
    delivery.ack(BasicAckOptions::default()).await?;
    Ok(())
}
