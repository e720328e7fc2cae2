//! HTTP client for the Twilio messaging API.
//!
//! The dispatcher talks to the gateway through the [`SmsGateway`] trait; the
//! concrete [`TwilioClient`] normalizes every network and protocol failure
//! into a [`SendResult`] so no error escapes a send call.

#![forbid(unsafe_code)]

pub use client::{SmsGateway, TwilioClient};
pub use err::TwilioError;
pub use types::{OutboundSms, SendResult};

mod client;
mod err;
mod types;

/// Production API origin; overridable for tests.
pub const TWILIO_API_URL: &str = "https://api.twilio.com";
