//! Shared runtime plumbing for Sengine agents: settings loading, tracing,
//! Prometheus metrics, the broker connection and topology, database pool
//! construction, pacing primitives, and the agent lifecycle.

#![forbid(unsafe_code)]

pub use agent::{agent_main, run_all, BaseAgent, LoadableFromSettings};
pub use metrics::CoreMetrics;
pub use rate::TokenBucket;
pub use settings::Settings;

mod agent;
/// Broker connection, topology, publishing, and consumer plumbing.
pub mod broker;
/// Database pool construction.
pub mod db;
#[macro_use]
mod macros;
mod metrics;
mod rate;
/// Settings structs and the environment loader.
pub mod settings;
