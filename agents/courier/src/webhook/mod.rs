//! User-facing webhook fan-out: the producer matches subscriptions and
//! enqueues signed delivery jobs; the dispatcher POSTs them and records the
//! attempt history.

pub use dispatcher::spawn_webhook_dispatcher;
pub use producer::WebhookProducer;

mod dispatcher;
mod producer;
