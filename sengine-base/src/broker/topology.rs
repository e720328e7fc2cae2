use std::time::Duration;

use eyre::Result;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::debug;

/// Primary exchange for the inbox domain (send/inbound/status/notify/webhook).
pub const INBOX_EXCHANGE: &str = "inbox";
/// Dead-letter exchange for the inbox domain.
pub const INBOX_DLX: &str = "inbox.dlx";
/// Primary exchange for the drip domain.
pub const DRIP_EXCHANGE: &str = "drip";
/// Dead-letter exchange for the drip domain.
pub const DRIP_DLX: &str = "drip.dlx";

/// Direct outbound sends.
pub const SEND_QUEUE: &str = "inbox.send";
/// Routing key for [`SEND_QUEUE`].
pub const SEND_RK: &str = "send";
/// Inbound messages from the provider.
pub const INBOUND_QUEUE: &str = "inbox.inbound";
/// Routing key for [`INBOUND_QUEUE`].
pub const INBOUND_RK: &str = "inbound";
/// Provider delivery reports.
pub const STATUS_QUEUE: &str = "inbox.status";
/// Routing key for [`STATUS_QUEUE`].
pub const STATUS_RK: &str = "status";
/// Internal realtime notifications (produced here, consumed upstream).
pub const NOTIFY_QUEUE: &str = "inbox.notify";
/// Routing key for [`NOTIFY_QUEUE`].
pub const NOTIFY_RK: &str = "notify";
/// Webhook dispatch jobs.
pub const WEBHOOK_QUEUE: &str = "inbox.webhook";
/// Routing key for [`WEBHOOK_QUEUE`].
pub const WEBHOOK_RK: &str = "webhook";
/// Dead-lettered inbox messages, retained for a week.
pub const INBOX_FAILED_QUEUE: &str = "inbox.failed";

/// Scheduled drip sends.
pub const DRIP_MESSAGES_QUEUE: &str = "drip.messages";
/// Routing key for [`DRIP_MESSAGES_QUEUE`].
pub const DRIP_SEND_RK: &str = "drip.send";
/// Dead-lettered drip messages, retained for a week.
pub const DRIP_DEAD_QUEUE: &str = "drip.dead";
/// Routing key messages take into the drip DLX.
pub const DRIP_FAILED_RK: &str = "drip.failed";

const TTL_24H: Duration = Duration::from_secs(24 * 60 * 60);
const TTL_1H: Duration = Duration::from_secs(60 * 60);
const TTL_7D: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Declaration of one durable queue: its binding and dead-letter routing.
#[derive(Clone, Copy, Debug)]
pub struct QueueSpec {
    /// Queue name.
    pub name: &'static str,
    /// Exchange the queue binds to.
    pub exchange: &'static str,
    /// Binding routing key.
    pub routing_key: &'static str,
    /// Per-message TTL, if any.
    pub message_ttl: Option<Duration>,
    /// `(dead letter exchange, routing-key override)`.
    pub dead_letter: Option<(&'static str, Option<&'static str>)>,
}

impl QueueSpec {
    /// The `x-*` arguments this queue is declared with.
    pub fn queue_args(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(ttl) = self.message_ttl {
            args.insert("x-message-ttl".into(), AMQPValue::LongInt(ttl.as_millis() as i32));
        }
        if let Some((dlx, rk)) = self.dead_letter {
            args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(dlx.into()));
            if let Some(rk) = rk {
                args.insert(
                    "x-dead-letter-routing-key".into(),
                    AMQPValue::LongString(rk.into()),
                );
            }
        }
        args
    }
}

/// Every queue this process declares, in declaration order.
///
/// Dead-lettered inbox messages keep their original routing key, so
/// `inbox.failed` is additionally bound per primary routing key below.
pub const QUEUES: &[QueueSpec] = &[
    QueueSpec {
        name: SEND_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: SEND_RK,
        message_ttl: Some(TTL_24H),
        dead_letter: Some((INBOX_DLX, None)),
    },
    QueueSpec {
        name: INBOUND_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: INBOUND_RK,
        message_ttl: Some(TTL_24H),
        dead_letter: Some((INBOX_DLX, None)),
    },
    QueueSpec {
        name: STATUS_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: STATUS_RK,
        message_ttl: Some(TTL_24H),
        dead_letter: Some((INBOX_DLX, None)),
    },
    QueueSpec {
        name: NOTIFY_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: NOTIFY_RK,
        message_ttl: None,
        dead_letter: None,
    },
    QueueSpec {
        name: WEBHOOK_QUEUE,
        exchange: INBOX_EXCHANGE,
        routing_key: WEBHOOK_RK,
        message_ttl: Some(TTL_24H),
        dead_letter: Some((INBOX_DLX, None)),
    },
    QueueSpec {
        name: DRIP_MESSAGES_QUEUE,
        exchange: DRIP_EXCHANGE,
        routing_key: DRIP_SEND_RK,
        message_ttl: Some(TTL_1H),
        dead_letter: Some((DRIP_DLX, Some(DRIP_FAILED_RK))),
    },
    QueueSpec {
        name: DRIP_DEAD_QUEUE,
        exchange: DRIP_DLX,
        routing_key: DRIP_FAILED_RK,
        message_ttl: Some(TTL_7D),
        dead_letter: None,
    },
];

/// Declare both domains' exchanges, queues, and bindings. Idempotent; safe
/// to run on every (re)connect.
pub async fn declare_topology(channel: &Channel) -> Result<()> {
    for exchange in [INBOX_EXCHANGE, INBOX_DLX, DRIP_EXCHANGE, DRIP_DLX] {
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }

    let durable = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };

    for spec in QUEUES {
        channel
            .queue_declare(spec.name, durable, spec.queue_args())
            .await?;
        channel
            .queue_bind(
                spec.name,
                spec.exchange,
                spec.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(queue = spec.name, exchange = spec.exchange, "declared queue");
    }

    // inbox.failed holds week-old dead letters under their original keys.
    let mut failed_args = FieldTable::default();
    failed_args.insert("x-message-ttl".into(), AMQPValue::LongInt(TTL_7D.as_millis() as i32));
    channel
        .queue_declare(INBOX_FAILED_QUEUE, durable, failed_args)
        .await?;
    for rk in [SEND_RK, INBOUND_RK, STATUS_RK, WEBHOOK_RK] {
        channel
            .queue_bind(
                INBOX_FAILED_QUEUE,
                INBOX_DLX,
                rk,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn arg<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table.inner().get(&lapin::types::ShortString::from(key))
    }

    #[test]
    fn drip_queue_dead_letters_with_override_key() {
        let spec = QUEUES
            .iter()
            .find(|q| q.name == DRIP_MESSAGES_QUEUE)
            .unwrap();
        let args = spec.queue_args();
        assert_eq!(
            arg(&args, "x-message-ttl"),
            Some(&AMQPValue::LongInt(3_600_000))
        );
        assert_eq!(
            arg(&args, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("drip.dlx".into()))
        );
        assert_eq!(
            arg(&args, "x-dead-letter-routing-key"),
            Some(&AMQPValue::LongString("drip.failed".into()))
        );
    }

    #[test]
    fn notify_queue_has_no_ttl_and_no_dlx() {
        let spec = QUEUES.iter().find(|q| q.name == NOTIFY_QUEUE).unwrap();
        assert!(spec.queue_args().inner().is_empty());
    }

    #[test]
    fn inbox_queues_expire_after_a_day() {
        for name in [SEND_QUEUE, INBOUND_QUEUE, STATUS_QUEUE, WEBHOOK_QUEUE] {
            let spec = QUEUES.iter().find(|q| q.name == name).unwrap();
            assert_eq!(
                arg(&spec.queue_args(), "x-message-ttl"),
                Some(&AMQPValue::LongInt(86_400_000)),
                "{name}"
            );
        }
    }
}
