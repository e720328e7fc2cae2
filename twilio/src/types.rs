use serde::Deserialize;

/// A single outbound message, ready for the gateway.
#[derive(Clone, Debug)]
pub struct OutboundSms {
    /// Sending number (any format; normalized before the call).
    pub from: String,
    /// Recipient number.
    pub to: String,
    /// Final (personalized) body.
    pub body: String,
    /// Optional media attachment URL.
    pub media_url: Option<String>,
    /// Where the provider should POST delivery reports.
    pub status_callback: Option<String>,
}

/// Normalized outcome of one gateway call.
///
/// `success` is true iff the provider accepted the message. On failure the
/// error fields are populated and everything else is best-effort.
#[derive(Clone, Debug, Default)]
pub struct SendResult {
    /// Whether the provider accepted the message.
    pub success: bool,
    /// Provider message id (`SMxxxx`), set on acceptance.
    pub provider_message_id: Option<String>,
    /// Provider textual status at acceptance time (`queued`, `accepted`, ...).
    pub status: Option<String>,
    /// Number of SMS segments the body was split into.
    pub segment_count: Option<u32>,
    /// Number of media attachments the provider registered.
    pub media_count: Option<u32>,
    /// Provider-side creation timestamp, verbatim.
    pub date_created: Option<String>,
    /// Provider error code on failure.
    pub error_code: Option<String>,
    /// Human-readable error description on failure.
    pub error_message: Option<String>,
}

impl SendResult {
    pub(crate) fn failure(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: code,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Successful response body of the Messages endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageResource {
    pub sid: String,
    pub status: Option<String>,
    pub num_segments: Option<String>,
    pub num_media: Option<String>,
    pub date_created: Option<String>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Error response body of the Messages endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl From<MessageResource> for SendResult {
    fn from(res: MessageResource) -> Self {
        Self {
            success: true,
            provider_message_id: Some(res.sid),
            status: res.status,
            segment_count: res.num_segments.and_then(|s| s.parse().ok()),
            media_count: res.num_media.and_then(|s| s.parse().ok()),
            date_created: res.date_created,
            error_code: res.error_code.map(|c| c.to_string()),
            error_message: res.error_message,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_resource_parses_and_converts() {
        let raw = r#"{
            "sid": "SM1",
            "status": "queued",
            "num_segments": "2",
            "num_media": "0",
            "date_created": "Wed, 01 May 2024 12:00:00 +0000",
            "error_code": null,
            "error_message": null
        }"#;
        let res: MessageResource = serde_json::from_str(raw).unwrap();
        let out = SendResult::from(res);
        assert!(out.success);
        assert_eq!(out.provider_message_id.as_deref(), Some("SM1"));
        assert_eq!(out.segment_count, Some(2));
        assert_eq!(out.media_count, Some(0));
    }

    #[test]
    fn api_error_parses() {
        let raw = r#"{"code": 21610, "message": "Unsubscribed recipient", "status": 400}"#;
        let err: ApiError = serde_json::from_str(raw).unwrap();
        assert_eq!(err.code, Some(21610));
        assert_eq!(err.message.as_deref(), Some("Unsubscribed recipient"));
    }
}
