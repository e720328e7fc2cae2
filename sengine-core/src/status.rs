use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Raised when a numeric status column holds a value outside the known set.
#[derive(Debug, Error)]
#[error("unknown status code {0}")]
pub struct UnknownStatus(pub i16);

/// Lifecycle of a scheduled (pre-queue) message.
///
/// The status is monotone along Pending → Queued → Sending → Sent →
/// Delivered. `Failed` is reachable from any non-terminal state and
/// `Cancelled` only from `Pending`. A row never moves backwards; in
/// particular `Queued` never returns to `Pending`.
#[derive(Copy, Clone, Debug, Display, EnumString, Eq, PartialEq, Ord, PartialOrd)]
#[strum(serialize_all = "snake_case")]
#[repr(i16)]
pub enum ScheduleStatus {
    /// Waiting in storage for the pre-queue window.
    Pending = 0,
    /// Published to the broker; the broker owns delivery.
    Queued = 1,
    /// Picked up by a dispatcher, gateway call in flight.
    Sending = 2,
    /// Accepted by the gateway.
    Sent = 3,
    /// Confirmed delivered by the provider.
    Delivered = 4,
    /// Terminally failed; `error_message` carries the reason.
    Failed = 5,
    /// Cancelled upstream before it was ever queued.
    Cancelled = 6,
}

impl ScheduleStatus {
    /// Whether no further transition is permitted from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }
}

impl From<ScheduleStatus> for i16 {
    fn from(s: ScheduleStatus) -> i16 {
        s as i16
    }
}

impl TryFrom<i16> for ScheduleStatus {
    type Error = UnknownStatus;

    fn try_from(v: i16) -> Result<Self, UnknownStatus> {
        Ok(match v {
            0 => Self::Pending,
            1 => Self::Queued,
            2 => Self::Sending,
            3 => Self::Sent,
            4 => Self::Delivered,
            5 => Self::Failed,
            6 => Self::Cancelled,
            other => return Err(UnknownStatus(other)),
        })
    }
}

/// Status of a per-enrollment drip tracking row, updated after each send.
#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
#[repr(i16)]
pub enum DripContactStatus {
    /// Enrolled, nothing sent yet.
    Pending = 0,
    /// The drip message reached the gateway.
    Sent = 1,
    /// The provider confirmed delivery.
    Delivered = 2,
    /// The send failed terminally.
    Failed = 3,
    /// Skipped (e.g. the contact opted out mid-campaign).
    Skipped = 4,
    /// The enrollment was cancelled upstream.
    Cancelled = 5,
}

impl From<DripContactStatus> for i16 {
    fn from(s: DripContactStatus) -> i16 {
        s as i16
    }
}

/// Direction of a `messages` row.
#[derive(Copy, Clone, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent by us through the gateway.
    Outbound,
    /// Received from a contact.
    Inbound,
}

impl Direction {
    /// The column value stored in `messages.direction`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

/// Message type code: plain SMS or media-bearing MMS.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i16)]
pub enum MessageKind {
    /// Text only.
    Sms = 1,
    /// Carries at least one media attachment.
    Mms = 2,
}

impl MessageKind {
    /// Classify by the provider-reported media count.
    pub fn from_media_count(num_media: u32) -> Self {
        if num_media > 0 {
            Self::Mms
        } else {
            Self::Sms
        }
    }
}

/// Coarse numeric delivery state stored in `messages.status`.
pub mod coarse {
    /// Accepted by the provider, not yet handed to a carrier.
    pub const QUEUED: i16 = 0;
    /// In flight (provider `sending` or `sent`).
    pub const SENT: i16 = 1;
    /// Confirmed delivered (or read).
    pub const DELIVERED: i16 = 2;
    /// Provider reported a hard failure.
    pub const FAILED: i16 = 3;
    /// Carrier accepted but could not deliver.
    pub const UNDELIVERED: i16 = 4;
}

/// Map a provider delivery-status callback onto our coarse numeric state.
///
/// Returns `None` for statuses we do not recognise; those propagate into the
/// textual `delivery_status` column only, leaving the coarse code untouched.
pub fn coarse_delivery_status(provider_status: &str) -> Option<i16> {
    match provider_status {
        "queued" => Some(coarse::QUEUED),
        "sending" | "sent" => Some(coarse::SENT),
        "delivered" | "read" => Some(coarse::DELIVERED),
        "failed" => Some(coarse::FAILED),
        "undelivered" => Some(coarse::UNDELIVERED),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn schedule_status_round_trips_through_i16() {
        for s in [
            ScheduleStatus::Pending,
            ScheduleStatus::Queued,
            ScheduleStatus::Sending,
            ScheduleStatus::Sent,
            ScheduleStatus::Delivered,
            ScheduleStatus::Failed,
            ScheduleStatus::Cancelled,
        ] {
            assert_eq!(ScheduleStatus::try_from(i16::from(s)).unwrap(), s);
        }
        assert!(ScheduleStatus::try_from(99).is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!ScheduleStatus::Pending.is_terminal());
        assert!(!ScheduleStatus::Queued.is_terminal());
        assert!(!ScheduleStatus::Sent.is_terminal());
        assert!(ScheduleStatus::Failed.is_terminal());
        assert!(ScheduleStatus::Cancelled.is_terminal());
        assert!(ScheduleStatus::Delivered.is_terminal());
    }

    #[test]
    fn provider_status_mapping_matches_table() {
        assert_eq!(coarse_delivery_status("queued"), Some(0));
        assert_eq!(coarse_delivery_status("sending"), Some(1));
        assert_eq!(coarse_delivery_status("sent"), Some(1));
        assert_eq!(coarse_delivery_status("delivered"), Some(2));
        assert_eq!(coarse_delivery_status("undelivered"), Some(4));
        assert_eq!(coarse_delivery_status("failed"), Some(3));
        assert_eq!(coarse_delivery_status("read"), Some(2));
        assert_eq!(coarse_delivery_status("canceled"), None);
    }

    #[test]
    fn mms_classification() {
        assert_eq!(MessageKind::from_media_count(0), MessageKind::Sms);
        assert_eq!(MessageKind::from_media_count(2), MessageKind::Mms);
    }
}
