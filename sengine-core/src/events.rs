use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// User-facing webhook event tags.
///
/// The string forms are the wire tags stored in `webhooks.events` and carried
/// in the `X-Webhook-Event` header.
#[derive(
    Copy, Clone, Debug, Display, EnumString, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
pub enum EventKind {
    /// A message left through the gateway (fired at gateway-accept).
    #[strum(serialize = "outbound_message")]
    #[serde(rename = "outbound_message")]
    OutboundMessage,
    /// An inbound message arrived.
    #[strum(serialize = "message.inbound")]
    #[serde(rename = "message.inbound")]
    MessageInbound,
    /// The provider confirmed delivery.
    #[strum(serialize = "message.delivered")]
    #[serde(rename = "message.delivered")]
    MessageDelivered,
    /// The provider reported failure or non-delivery.
    #[strum(serialize = "message.failed")]
    #[serde(rename = "message.failed")]
    MessageFailed,
    /// A contact opted back in.
    #[strum(serialize = "contact.optin")]
    #[serde(rename = "contact.optin")]
    ContactOptin,
    /// A contact opted out.
    #[strum(serialize = "contact.optout")]
    #[serde(rename = "contact.optout")]
    ContactOptout,
}

/// The JSON body POSTed to a subscriber endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Globally unique id for this event, echoed in `X-Webhook-Delivery`.
    pub event_id: String,
    /// The event tag.
    pub event: EventKind,
    /// When the event was produced.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Event-specific payload.
    pub data: serde_json::Value,
}

impl WebhookEnvelope {
    /// Build an envelope stamped with a fresh event id and the given instant.
    pub fn new(event: EventKind, timestamp: OffsetDateTime, data: serde_json::Value) -> Self {
        Self {
            event_id: crate::tokens::mint_uid(),
            event,
            timestamp,
            data,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_tags_are_stable() {
        assert_eq!(EventKind::OutboundMessage.to_string(), "outbound_message");
        assert_eq!(EventKind::MessageInbound.to_string(), "message.inbound");
        assert_eq!(EventKind::ContactOptout.to_string(), "contact.optout");
        assert_eq!(
            "message.delivered".parse::<EventKind>().unwrap(),
            EventKind::MessageDelivered
        );
    }

    #[test]
    fn envelope_serializes_event_as_tag() {
        let env = WebhookEnvelope::new(
            EventKind::MessageFailed,
            time::macros::datetime!(2024-05-01 12:00 UTC),
            serde_json::json!({"message_id": 7}),
        );
        let v: serde_json::Value = serde_json::from_str(&serde_json::to_string(&env).unwrap()).unwrap();
        assert_eq!(v["event"], "message.failed");
        assert_eq!(v["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(v["data"]["message_id"], 7);
    }
}
