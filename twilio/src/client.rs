use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use sengine_core::{phone, GatewayCredentials};

use crate::types::{ApiError, MessageResource};
use crate::{OutboundSms, SendResult, TwilioError, TWILIO_API_URL};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Abstraction over the SMS gateway so the dispatcher can be exercised with
/// a mock in tests.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Submit one message. Never errors; failures come back inside the
    /// [`SendResult`].
    async fn send(&self, sms: OutboundSms, credentials: Option<GatewayCredentials>) -> SendResult;
}

/// Twilio Messages API client.
#[derive(Clone, Debug)]
pub struct TwilioClient {
    http: reqwest::Client,
    api_url: String,
    default_credentials: Option<GatewayCredentials>,
}

impl TwilioClient {
    /// Build a client with the process-wide default credentials.
    pub fn new(default_credentials: Option<GatewayCredentials>) -> Result<Self, TwilioError> {
        let http = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_url: TWILIO_API_URL.to_string(),
            default_credentials,
        })
    }

    /// Point the client at a different API origin (test servers).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Tenant-provided credentials win over the process defaults.
    fn select_credentials(
        &self,
        call_credentials: Option<GatewayCredentials>,
    ) -> Option<GatewayCredentials> {
        call_credentials.or_else(|| self.default_credentials.clone())
    }
}

#[async_trait]
impl SmsGateway for TwilioClient {
    #[instrument(skip(self, sms, credentials), fields(to = %sms.to))]
    async fn send(&self, sms: OutboundSms, credentials: Option<GatewayCredentials>) -> SendResult {
        let Some(creds) = self.select_credentials(credentials) else {
            return SendResult::failure(None, "no gateway credentials configured");
        };

        let from = phone::normalize_e164(&sms.from);
        let to = phone::normalize_e164(&sms.to);

        let mut form: Vec<(&str, &str)> =
            vec![("From", &from), ("To", &to), ("Body", &sms.body)];
        if let Some(media_url) = sms.media_url.as_deref() {
            form.push(("MediaUrl", media_url));
        }
        if let Some(callback) = sms.status_callback.as_deref() {
            form.push(("StatusCallback", callback));
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_url, creds.account_sid
        );

        let response = match self
            .http
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "gateway request failed");
                return SendResult::failure(None, e.to_string());
            }
        };

        let http_status = response.status();
        if http_status.is_success() {
            match response.json::<MessageResource>().await {
                Ok(resource) => {
                    debug!(sid = %resource.sid, "gateway accepted message");
                    resource.into()
                }
                Err(e) => {
                    warn!(error = %e, "gateway returned unreadable success body");
                    SendResult::failure(None, format!("unreadable gateway response: {e}"))
                }
            }
        } else {
            // Twilio error bodies are JSON {code, message}; fall back to the
            // HTTP status when the body is not parseable.
            match response.json::<ApiError>().await {
                Ok(api) => SendResult::failure(
                    api.code.map(|c| c.to_string()),
                    api.message
                        .unwrap_or_else(|| format!("gateway returned HTTP {http_status}")),
                ),
                Err(_) => {
                    SendResult::failure(None, format!("gateway returned HTTP {http_status}"))
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn missing_credentials_fail_without_a_request() {
        let client = TwilioClient::new(None).unwrap();
        let result = client
            .send(
                OutboundSms {
                    from: "5550001111".into(),
                    to: "5551112222".into(),
                    body: "hi".into(),
                    media_url: None,
                    status_callback: None,
                },
                None,
            )
            .await;
        assert!(!result.success);
        assert!(result
            .error_message
            .unwrap()
            .contains("no gateway credentials"));
    }

    #[tokio::test]
    async fn network_errors_fold_into_the_result() {
        // Nothing listens on this port; the connect error must not escape.
        let client = TwilioClient::new(Some(GatewayCredentials {
            account_sid: "AC0".into(),
            auth_token: "token".into(),
        }))
        .unwrap()
        .with_api_url("http://127.0.0.1:1");

        let result = client
            .send(
                OutboundSms {
                    from: "5550001111".into(),
                    to: "5551112222".into(),
                    body: "hi".into(),
                    media_url: None,
                    status_callback: None,
                },
                None,
            )
            .await;
        assert!(!result.success);
        assert!(result.provider_message_id.is_none());
        assert!(result.error_message.is_some());
    }

    #[test]
    fn tenant_credentials_take_precedence() {
        let client = TwilioClient::new(Some(GatewayCredentials {
            account_sid: "AC_default".into(),
            auth_token: "t1".into(),
        }))
        .unwrap();
        let chosen = client
            .select_credentials(Some(GatewayCredentials {
                account_sid: "AC_tenant".into(),
                auth_token: "t2".into(),
            }))
            .unwrap();
        assert_eq!(chosen.account_sid, "AC_tenant");

        let fallback = client.select_credentials(None).unwrap();
        assert_eq!(fallback.account_sid, "AC_default");
    }
}
