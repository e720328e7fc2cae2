//! Broker connectivity.
//!
//! One connection and one shared channel per process. Topology is declared
//! on every connect, so a fresh vhost comes up correctly. On connection loss
//! the supervisor tears the worker set down and calls [`Broker::connect`]
//! again, which retries with exponential backoff before giving up and
//! letting the process exit non-zero.

pub use consumer::{consume, delivery_retry_count, ConsumeSpec, MAX_DELIVERY_ATTEMPTS};
pub use topology::*;

mod consumer;
mod topology;

use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::settings::BrokerSettings;

/// Publish-side capability handed to event producers.
///
/// The broker channel is an ambient capability, not a global: producers hold
/// a `dyn Publisher` so tests can substitute a recorder.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a JSON value, persistent. Returns `true` iff the broker
    /// acknowledged the publish.
    async fn publish_value(
        &self,
        exchange: &str,
        routing_key: &str,
        message_id: &str,
        payload: serde_json::Value,
    ) -> Result<bool>;
}

#[async_trait]
impl Publisher for Broker {
    async fn publish_value(
        &self,
        exchange: &str,
        routing_key: &str,
        message_id: &str,
        payload: serde_json::Value,
    ) -> Result<bool> {
        self.publish_json(exchange, routing_key, message_id, &payload)
            .await
    }
}

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// A live broker connection with its shared channel.
#[derive(Debug)]
pub struct Broker {
    connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect with exponential backoff (1s doubling to a 30s cap, ten
    /// attempts), declare the topology, and enable publisher confirms.
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let mut delay = RECONNECT_BASE_DELAY;
        let mut last_err = eyre!("no connection attempt made");
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match Self::try_connect(&settings.url).await {
                Ok(broker) => {
                    info!(attempt, "broker connected");
                    return Ok(broker);
                }
                Err(e) => {
                    warn!(attempt, error = %e, retry_in = ?delay, "broker connect failed");
                    last_err = e;
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
        Err(last_err.wrap_err(format!(
            "broker unreachable after {MAX_CONNECT_ATTEMPTS} attempts"
        )))
    }

    async fn try_connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_topology(&channel).await?;
        Ok(Self { connection, channel })
    }

    /// A clone of the shared channel for a consumer or publisher.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Whether the underlying connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Publish a JSON payload, persistent, and wait for the publisher
    /// confirm. Returns `true` iff the broker acknowledged the publish; a
    /// nack (e.g. a full buffer) is not an error, the caller retries later.
    #[instrument(skip(self, payload), level = "debug")]
    pub async fn publish_json<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        message_id: &str,
        payload: &T,
    ) -> Result<bool> {
        let body = serde_json::to_vec(payload).wrap_err("serializing broker payload")?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_message_id(message_id.into())
            .with_timestamp(OffsetDateTime::now_utc().unix_timestamp() as u64);

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        Ok(matches!(
            confirm,
            Confirmation::Ack(_) | Confirmation::NotRequested
        ))
    }

    /// Current depth of a queue via a passive declare.
    pub async fn queue_depth(&self, queue: &str) -> Result<u32> {
        let state = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(state.message_count())
    }

    /// Close the connection, flushing the channel first.
    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(0, "shutdown")
            .await
            .wrap_err("closing broker connection")
    }
}
