//! Core types and domain logic shared by the Sengine workers.
//!
//! This crate is runtime-agnostic: nothing in here performs I/O. The worker
//! agents layer storage, broker, and gateway access on top of these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use error::FailReason;
pub use events::{EventKind, WebhookEnvelope};
pub use payload::*;
pub use status::*;

mod error;
mod events;
/// Opt-in / opt-out keyword matching for inbound message bodies.
pub mod keywords;
mod payload;
/// Phone number normalization and fuzzy matching.
pub mod phone;
/// HMAC-SHA256 signing of webhook payloads.
pub mod signing;
mod status;
/// Body personalization: `[first]`-style variable substitution.
pub mod template;
/// Tracking token minting (`b_ref` and message uids).
pub mod tokens;
