//! Wire shapes for the broker queues.
//!
//! All payloads are JSON with camelCase keys; instants travel as RFC 3339
//! strings. These structs are the contract with the upstream API, so field
//! names are load-bearing.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A drip send job published by the pre-queue scheduler to `drip.messages`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DripSendJob {
    /// Id of the `scheduled_messages` row this job was drained from.
    pub scheduled_message_id: i64,
    /// Id of the per-enrollment tracking row to update after the send.
    pub drip_contact_id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Owning workspace.
    pub workspace_id: i64,
    /// Recipient contact.
    pub contact_id: i64,
    /// The drip step this send belongs to.
    pub drip_id: i64,
    /// The campaign the drip belongs to.
    pub campaign_id: i64,
    /// Preferred sending number, if the enrollment pinned one.
    #[serde(default)]
    pub from_number: Option<String>,
    /// Recipient number.
    pub to_number: String,
    /// Id of the provisioned sender number row, if known.
    #[serde(default)]
    pub sid: Option<i64>,
    /// Message body before personalization.
    pub message: String,
    /// Optional media attachment.
    #[serde(default)]
    pub media_url: Option<String>,
    /// When the message was scheduled to go out.
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    /// When the pre-queue scheduler published it.
    #[serde(with = "time::serde::rfc3339")]
    pub queued_at: OffsetDateTime,
    /// Synthetic traffic marker; short-circuits the dispatcher.
    #[serde(default)]
    pub is_load_test: bool,
    /// Credit cost override (defaults to 1).
    #[serde(default)]
    pub credit_cost: Option<i64>,
}

impl DripSendJob {
    /// Credits to charge for this send.
    pub fn credit_cost(&self) -> i64 {
        self.credit_cost.unwrap_or(1).max(1)
    }
}

/// Jobs on the `inbox.send` queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboxJob {
    /// A direct (non-drip) outbound send.
    #[serde(rename = "SEND_SMS", rename_all = "camelCase")]
    SendSms {
        /// Delivery attempts so far, bumped by the requeue path.
        #[serde(default)]
        retry_count: u32,
        /// The send itself.
        data: SendSmsJob,
    },
}

/// Body of an [`InboxJob::SendSms`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsJob {
    /// The pre-created `messages` row to send and update in place.
    pub message_id: i64,
    /// Tracking token minted when the row was created.
    pub b_ref: String,
    /// Sending number.
    pub from_number: String,
    /// Recipient number.
    pub to_number: String,
    /// Message body.
    pub message: String,
    /// Optional media attachment.
    #[serde(default)]
    pub media_url: Option<String>,
    /// Recipient contact.
    pub contact_id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Owning workspace.
    pub workspace_id: i64,
    /// Where the provider should post delivery reports.
    #[serde(default)]
    pub status_callback_url: Option<String>,
    /// Tenant credential override for the gateway call.
    #[serde(default)]
    pub twilio_credentials: Option<GatewayCredentials>,
    /// Synthetic traffic marker.
    #[serde(default)]
    pub is_load_test: bool,
    /// Credit cost override (defaults to 1).
    #[serde(default)]
    pub credit_cost: Option<i64>,
}

impl SendSmsJob {
    /// Credits to charge for this send.
    pub fn credit_cost(&self) -> i64 {
        self.credit_cost.unwrap_or(1).max(1)
    }
}

/// Per-tenant gateway credentials carried inside a send job.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCredentials {
    /// Provider account identifier.
    pub account_sid: String,
    /// Provider auth token.
    pub auth_token: String,
}

/// A provider delivery report on `inbox.status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusEvent {
    /// The report body.
    pub data: StatusReport,
}

/// Body of a [`StatusEvent`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Provider message id the report refers to.
    pub message_sid: String,
    /// Provider textual status (`queued`, `sent`, `delivered`, ...).
    pub status: String,
    /// Our tracking token, echoed back through the status callback URL.
    #[serde(default)]
    pub b_ref: Option<String>,
    /// Provider error code, when the status is a failure.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Provider error description.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// An inbound message event on `inbox.inbound`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundEvent {
    /// The inbound message itself.
    pub data: InboundSms,
}

/// Body of an [`InboundEvent`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSms {
    /// Provider id of the inbound message.
    pub message_sid: String,
    /// The sender (the contact's number).
    pub from_number: String,
    /// The receiving provisioned number.
    pub to_number: String,
    /// Message body.
    #[serde(default)]
    pub body: String,
    /// Number of media attachments.
    #[serde(default)]
    pub num_media: u32,
    /// First media URL, when present.
    #[serde(default)]
    pub media_url: Option<String>,
}

/// A webhook dispatch job on `inbox.webhook`.
///
/// Carries row ids only; the dispatcher re-reads the subscription so a
/// secret rotation between enqueue and delivery takes effect.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDispatchJob {
    /// The pending `webhook_deliveries` row.
    pub delivery_id: i64,
    /// The parent subscription.
    pub webhook_id: i64,
}

/// An internal notification on `inbox.notify` (consumed by the realtime
/// layer upstream, produced here).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEvent {
    /// Notification tag, e.g. `message:new`.
    pub event: String,
    /// Owning user.
    pub user_id: i64,
    /// Owning workspace.
    pub workspace_id: i64,
    /// Related contact.
    pub contact_id: i64,
    /// Related message row.
    pub message_id: i64,
    /// The user's unread message count after this event.
    pub unread_count: i64,
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn drip_job_round_trips_with_camel_case_keys() {
        let job = DripSendJob {
            scheduled_message_id: 11,
            drip_contact_id: 22,
            user_id: 3,
            workspace_id: 4,
            contact_id: 5,
            drip_id: 6,
            campaign_id: 7,
            from_number: Some("+15550001111".into()),
            to_number: "+15551112222".into(),
            sid: None,
            message: "hi [first]".into(),
            media_url: None,
            scheduled_at: datetime!(2024-05-01 12:00 UTC),
            queued_at: datetime!(2024-05-01 11:46 UTC),
            is_load_test: false,
            credit_cost: None,
        };
        let v: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&job).unwrap()).unwrap();
        assert_eq!(v["scheduledMessageId"], 11);
        assert_eq!(v["toNumber"], "+15551112222");
        assert_eq!(v["scheduledAt"], "2024-05-01T12:00:00Z");

        let back: DripSendJob = serde_json::from_value(v).unwrap();
        assert_eq!(back.drip_contact_id, 22);
        assert_eq!(back.credit_cost(), 1);
    }

    #[test]
    fn send_sms_envelope_uses_type_tag() {
        let raw = r#"{
            "type": "SEND_SMS",
            "retryCount": 1,
            "data": {
                "messageId": 42,
                "bRef": "DM-1714564800000-123456",
                "fromNumber": "+15550001111",
                "toNumber": "+15551112222",
                "message": "hello",
                "contactId": 5,
                "userId": 3,
                "workspaceId": 4
            }
        }"#;
        let InboxJob::SendSms { retry_count, data } = serde_json::from_str(raw).unwrap();
        assert_eq!(retry_count, 1);
        assert_eq!(data.message_id, 42);
        assert!(data.twilio_credentials.is_none());
        assert_eq!(data.credit_cost(), 1);
    }

    #[test]
    fn status_event_tolerates_missing_optionals() {
        let raw = r#"{"data":{"messageSid":"SM1","status":"delivered"}}"#;
        let ev: StatusEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.data.status, "delivered");
        assert!(ev.data.b_ref.is_none());
    }
}
