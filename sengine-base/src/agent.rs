use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Report, Result};
use futures_util::future::select_all;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tracing::{info_span, instrument::Instrumented, Instrument};

use crate::{cancel_task, metrics::CoreMetrics, settings::Settings};

/// Settings of an agent: a base [`Settings`] plus agent-specific fields,
/// loadable from the process environment.
pub trait LoadableFromSettings: AsRef<Settings> + Sized {
    /// Read the environment and build the settings object.
    fn load() -> Result<Self>;
}

/// A long-running worker process.
#[async_trait]
pub trait BaseAgent: Send + Sync + Debug {
    /// The agent's name, used for metrics labels and log context.
    const AGENT_NAME: &'static str;

    /// The settings object for this agent.
    type Settings: LoadableFromSettings;

    /// Instantiate the agent: connect to the broker and database, build
    /// clients. Fails fast on unreachable dependencies.
    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized;

    /// Start all worker tasks and return a handle supervising them.
    #[allow(clippy::async_yields_async)]
    async fn run(self) -> Instrumented<JoinHandle<Result<()>>>;
}

/// Call this from `main` to initialize tracing and metrics and run the agent
/// for its entire lifecycle. Returns (and thus exits non-zero) on fatal
/// startup failures and on worker errors that escape supervision.
pub async fn agent_main<A: BaseAgent>() -> Result<()> {
    let settings = A::Settings::load()?;
    let core_settings: &Settings = settings.as_ref();

    let metrics = Arc::new(CoreMetrics::new(
        A::AGENT_NAME,
        core_settings.metrics_port,
        Registry::new(),
    )?);
    core_settings.tracing.start_tracing()?;

    let agent = A::from_settings(settings, metrics.clone()).await?;
    metrics.run_http_server();

    agent.run().await.await?
}

/// Run multiple tasks and shut down if any one of them ends.
#[allow(clippy::unit_arg, unused_must_use)]
pub fn run_all(
    tasks: Vec<Instrumented<JoinHandle<Result<(), Report>>>>,
) -> Instrumented<JoinHandle<Result<()>>> {
    debug_assert!(!tasks.is_empty(), "No tasks submitted");
    let span = info_span!("run_all");
    tokio::spawn(async move {
        let (res, _, remaining) = select_all(tasks).await;

        for task in remaining.into_iter() {
            cancel_task!(task);
        }

        res?
    })
    .instrument(span)
}
