use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use futures_util::future::select_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, info_span, instrument::Instrumented, warn, Instrument};

use sengine_base::broker::{Broker, Publisher};
use sengine_base::{BaseAgent, CoreMetrics, TokenBucket};
use sengine_core::GatewayCredentials;
use twilio::{SmsGateway, TwilioClient};

use crate::db::CourierDb;
use crate::dispatcher::{spawn_drip_dispatcher, spawn_send_dispatcher, SendContext};
use crate::inbound::spawn_ingestor;
use crate::monitor::spawn_queue_monitor;
use crate::prequeue::PreQueueScheduler;
use crate::reconciler::spawn_reconciler;
use crate::settings::CourierSettings;
use crate::webhook::{spawn_webhook_dispatcher, WebhookProducer};

type WorkerHandle = Instrumented<JoinHandle<Result<()>>>;

/// Gap between topology declaration and consumer start, so consumers never
/// race a queue that is still being declared.
const CONSUMER_START_DELAY: Duration = Duration::from_secs(2);

/// The message-processing agent: supervises the pre-queue scheduler, the
/// dispatchers, the reconciler, the ingestor, the webhook dispatcher, and
/// the queue monitor over one shared broker connection.
pub struct Courier {
    settings: CourierSettings,
    metrics: Arc<CoreMetrics>,
    db: CourierDb,
    gateway: Arc<dyn SmsGateway>,
    bucket: Arc<TokenBucket>,
}

impl Debug for Courier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Courier {{ settings: {:?} }}", self.settings)
    }
}

#[async_trait]
impl BaseAgent for Courier {
    const AGENT_NAME: &'static str = "courier";
    type Settings = CourierSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let db = CourierDb::connect(&settings.base.db)
            .await
            .wrap_err("connecting database pools")?;

        let default_credentials = match (
            settings.base.gateway.account_sid.clone(),
            settings.base.gateway.auth_token.clone(),
        ) {
            (Some(account_sid), Some(auth_token)) => Some(GatewayCredentials {
                account_sid,
                auth_token,
            }),
            _ => None,
        };
        let gateway: Arc<dyn SmsGateway> = Arc::new(
            TwilioClient::new(default_credentials).wrap_err("building gateway client")?,
        );

        let bucket = Arc::new(TokenBucket::new(
            settings.base.gateway.rate_limit_per_sec,
            settings.base.gateway.rate_limit_burst,
        ));

        Ok(Self {
            settings,
            metrics,
            db,
            gateway,
            bucket,
        })
    }

    #[allow(clippy::async_yields_async)]
    async fn run(self) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("Courier");
        tokio::spawn(self.supervise()).instrument(span)
    }
}

impl Courier {
    /// Start order: broker connect + topology, settle delay, consumers, then
    /// the pre-queue scheduler and monitor. On SIGINT/SIGTERM the scheduler
    /// and consumers are told to stop, in-flight handlers get a bounded
    /// drain, then the broker connection closes. A crashed worker tears the
    /// set down and reconnects; a broker that stays unreachable exhausts the
    /// connect backoff and fails this task, exiting the process non-zero.
    async fn supervise(self) -> Result<()> {
        if !self.settings.base.broker.enabled {
            warn!("broker disabled by configuration; nothing to run");
            shutdown_signal().await;
            return Ok(());
        }

        let mut signal = Box::pin(shutdown_signal());
        loop {
            let broker = Arc::new(Broker::connect(&self.settings.base.broker).await?);
            tokio::time::sleep(CONSUMER_START_DELAY).await;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let workers = self.spawn_workers(broker.clone(), shutdown_rx)?;
            info!(workers = workers.len(), "worker set started");
            let mut worker_set = select_all(workers);

            tokio::select! {
                _ = &mut signal => {
                    info!("shutdown signal received, stopping workers");
                    let _ = shutdown_tx.send(true);
                    let deadline = Instant::now() + self.settings.base.kill_timeout;
                    drain(worker_set.into_inner(), deadline).await;
                    let _ = broker.close().await;
                    info!("shutdown complete");
                    return Ok(());
                }
                (result, _, remaining) = &mut worker_set => {
                    match result {
                        Ok(Ok(())) => warn!("worker exited unexpectedly"),
                        Ok(Err(e)) => warn!(error = %e, "worker failed"),
                        Err(e) => warn!(error = %e, "worker panicked"),
                    }
                    let _ = shutdown_tx.send(true);
                    let deadline = Instant::now() + self.settings.base.kill_timeout;
                    drain(remaining, deadline).await;
                    let _ = broker.close().await;
                    warn!("restarting worker set");
                }
            }
        }
    }

    fn spawn_workers(
        &self,
        broker: Arc<Broker>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<WorkerHandle>> {
        let webhooks = WebhookProducer::new(self.db.clone(), broker.clone());
        let ctx = Arc::new(SendContext {
            db: self.db.clone(),
            gateway: self.gateway.clone(),
            bucket: self.bucket.clone(),
            webhooks: webhooks.clone(),
            status_callback_url: self.settings.base.gateway.status_callback_url.clone(),
            processed: self.metrics.messages_processed_count(),
            gateway_seconds: self.metrics.gateway_send_duration_seconds(),
        });

        let mut workers: Vec<WorkerHandle> = vec![spawn_drip_dispatcher(
            broker.channel(),
            ctx.clone(),
            self.settings.drip.prefetch,
            self.settings.drip.per_message_delay,
            shutdown.clone(),
        )];
        if self.settings.drip.high_scale {
            workers.push(spawn_drip_dispatcher(
                broker.channel(),
                ctx.clone(),
                self.settings.drip.prefetch,
                self.settings.drip.per_message_delay,
                shutdown.clone(),
            ));
        }
        if self.settings.message_worker.enabled {
            workers.push(spawn_send_dispatcher(
                broker.channel(),
                ctx.clone(),
                self.settings.message_worker.prefetch,
                shutdown.clone(),
            ));
        }
        workers.push(spawn_reconciler(
            broker.channel(),
            self.db.clone(),
            webhooks.clone(),
            &self.metrics,
            shutdown.clone(),
        ));
        workers.push(spawn_ingestor(
            broker.channel(),
            self.db.clone(),
            broker.clone() as Arc<dyn Publisher>,
            webhooks.clone(),
            &self.metrics,
            shutdown.clone(),
        ));
        workers.push(spawn_webhook_dispatcher(
            broker.channel(),
            self.db.clone(),
            &self.metrics,
            shutdown.clone(),
        )?);
        workers.push(spawn_queue_monitor(
            broker.clone(),
            &self.metrics,
            shutdown.clone(),
        ));
        // Exactly one pre-queue scheduler may run fleet-wide; this process
        // assumes it is that one.
        workers.push(
            PreQueueScheduler::new(
                self.db.clone(),
                broker,
                self.settings.drip.clone(),
                &self.metrics,
            )
            .spawn(shutdown),
        );
        Ok(workers)
    }
}

/// Join workers one by one until the kill deadline, then abandon the rest.
async fn drain(workers: Vec<WorkerHandle>, deadline: Instant) {
    for worker in workers {
        match tokio::time::timeout_at(deadline, worker).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "worker exited with error during shutdown"),
            Ok(Err(e)) => warn!(error = %e, "worker panicked during shutdown"),
            Err(_) => {
                warn!("kill timeout reached, abandoning in-flight handlers");
                return;
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "no SIGTERM handler, falling back to ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
