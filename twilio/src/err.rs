use thiserror::Error;

/// Failures constructing the client. Send-path failures never surface as
/// errors; they are folded into [`crate::SendResult`].
#[derive(Debug, Error)]
pub enum TwilioError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}
