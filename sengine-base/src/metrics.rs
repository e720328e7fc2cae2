use std::collections::HashMap;
use std::sync::Arc;

use eyre::Result;
use prometheus::{
    histogram_opts, labels, opts, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};
use tokio::task::JoinHandle;

const NAMESPACE: &str = "sengine";

/// Macro to prefix a metric name with the namespace.
macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", NAMESPACE, $name)
    };
}

/// Process-wide metrics registry plus the well-known metrics every worker
/// reports into.
pub struct CoreMetrics {
    registry: Registry,
    const_labels: HashMap<String, String>,
    listen_port: Option<u16>,
    agent_name: String,

    messages_processed_count: IntCounterVec,
    queue_depth: IntGaugeVec,
    credit_movements_count: IntCounterVec,
    gateway_send_duration_seconds: HistogramVec,
    webhook_posts_count: IntCounterVec,
    prequeue_batch_size: IntGaugeVec,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    ///
    /// - `for_agent` name of the agent these metrics are tracking.
    /// - `listen_port` port to serve `/metrics` on; `None` disables the server.
    /// - `registry` prometheus registry to attach the metrics to.
    pub fn new(
        for_agent: &str,
        listen_port: Option<u16>,
        registry: Registry,
    ) -> prometheus::Result<Self> {
        let const_labels: HashMap<String, String> = labels! {
            "agent".into() => for_agent.into(),
        };
        let const_labels_ref = const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<HashMap<_, _>>();

        let messages_processed_count = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("messages_processed_count"),
                "Number of broker messages handled, by queue and outcome",
                const_labels_ref
            ),
            &["queue", "outcome"],
            registry
        )?;

        let queue_depth = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("queue_depth"),
                "Last observed broker queue depth",
                const_labels_ref
            ),
            &["queue"],
            registry
        )?;

        let credit_movements_count = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("credit_movements_count"),
                "Credit ledger movements, by kind (debit or refund)",
                const_labels_ref
            ),
            &["kind"],
            registry
        )?;

        let gateway_send_duration_seconds = register_histogram_vec_with_registry!(
            histogram_opts!(
                namespaced!("gateway_send_duration_seconds"),
                "Latency of SMS gateway calls, by outcome",
                prometheus::DEFAULT_BUCKETS.to_vec(),
                const_labels.clone()
            ),
            &["outcome"],
            registry
        )?;

        let webhook_posts_count = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("webhook_posts_count"),
                "Webhook delivery attempts, by outcome",
                const_labels_ref
            ),
            &["outcome"],
            registry
        )?;

        let prequeue_batch_size = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("prequeue_batch_size"),
                "Rows handled by the last pre-queue cycle, by stage",
                const_labels_ref
            ),
            &["stage"],
            registry
        )?;

        Ok(Self {
            agent_name: for_agent.into(),
            registry,
            listen_port,
            const_labels,

            messages_processed_count,
            queue_depth,
            credit_movements_count,
            gateway_send_duration_seconds,
            webhook_posts_count,
            prequeue_batch_size,
        })
    }

    /// Broker messages handled, labelled by `queue` and `outcome`.
    pub fn messages_processed_count(&self) -> IntCounterVec {
        self.messages_processed_count.clone()
    }

    /// Last observed queue depth, labelled by `queue`.
    pub fn queue_depth(&self) -> IntGaugeVec {
        self.queue_depth.clone()
    }

    /// Credit ledger movements, labelled by `kind`.
    pub fn credit_movements_count(&self) -> IntCounterVec {
        self.credit_movements_count.clone()
    }

    /// Gateway call latency, labelled by `outcome`.
    pub fn gateway_send_duration_seconds(&self) -> HistogramVec {
        self.gateway_send_duration_seconds.clone()
    }

    /// Webhook POST attempts, labelled by `outcome`.
    pub fn webhook_posts_count(&self) -> IntCounterVec {
        self.webhook_posts_count.clone()
    }

    /// Pre-queue cycle sizes, labelled by `stage` (`selected`, `published`).
    pub fn prequeue_batch_size(&self) -> IntGaugeVec {
        self.prequeue_batch_size.clone()
    }

    /// Create and register a new int gauge vec for an agent-specific metric.
    pub fn new_int_gauge(&self, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
        Ok(register_int_gauge_vec_with_registry!(
            opts!(namespaced!(name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    /// Create and register a new int counter vec for an agent-specific metric.
    pub fn new_int_counter(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec> {
        Ok(register_int_counter_vec_with_registry!(
            opts!(namespaced!(name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    fn const_labels_str(&self) -> HashMap<&str, &str> {
        self.const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Gather available metrics into an encoded (plaintext) report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    /// Run an HTTP server serving scrape reports on `/metrics`.
    pub fn run_http_server(self: Arc<Self>) -> JoinHandle<()> {
        use warp::Filter;
        if let Some(port) = self.listen_port {
            tracing::info!(port, "starting prometheus server on 0.0.0.0:{port}");
            tokio::spawn(async move {
                warp::serve(
                    warp::path!("metrics")
                        .map(move || {
                            warp::reply::with_header(
                                self.gather().expect("failed to encode metrics"),
                                "Content-Type",
                                "text/plain; charset=utf-8",
                            )
                        })
                        .or(warp::any().map(|| {
                            warp::reply::with_status(
                                "go look at /metrics",
                                warp::http::StatusCode::NOT_FOUND,
                            )
                        })),
                )
                .run(([0, 0, 0, 0], port))
                .await;
            })
        } else {
            tracing::info!("not starting prometheus server");
            tokio::spawn(std::future::ready(()))
        }
    }

    /// Get the name of this agent, e.g. "courier".
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

impl std::fmt::Debug for CoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CoreMetrics {{ agent_name: {}, listen_port: {:?} }}",
            self.agent_name, self.listen_port
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn metrics_register_and_gather() {
        let metrics = CoreMetrics::new("test", None, Registry::new()).unwrap();
        metrics
            .messages_processed_count()
            .with_label_values(&["drip.messages", "sent"])
            .inc();
        metrics
            .queue_depth()
            .with_label_values(&["inbox.send"])
            .set(3);

        let report = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(report.contains("sengine_messages_processed_count"));
        assert!(report.contains("sengine_queue_depth"));
    }

    #[test]
    fn double_registration_is_an_error() {
        let metrics = CoreMetrics::new("test", None, Registry::new()).unwrap();
        metrics
            .new_int_counter("custom_total", "a custom counter", &["label"])
            .unwrap();
        assert!(metrics
            .new_int_counter("custom_total", "a custom counter", &["label"])
            .is_err());
    }
}
