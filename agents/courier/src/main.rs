//! The courier moves messages between storage, the broker, and the SMS
//! gateway: it drains future-dated drip sends into the broker at a bounded
//! lead time, dispatches them through the gateway under token-bucket pacing,
//! reconciles provider delivery reports, ingests inbound messages, and fans
//! out user-facing webhook events.

#![forbid(unsafe_code)]

use eyre::Result;

use sengine_base::agent_main;

use crate::courier::Courier;

mod courier;
mod db;
mod dispatcher;
mod inbound;
mod monitor;
#[cfg(test)]
mod pipeline_tests;
mod prequeue;
mod reconciler;
mod settings;
mod webhook;

#[tokio::main]
async fn main() -> Result<()> {
    agent_main::<Courier>().await
}
