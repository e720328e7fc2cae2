//! Queue-depth monitor: samples broker queue depths, warns on backlog, and
//! periodically prints an operator-readable table.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use prometheus::IntGaugeVec;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, info_span, instrument::Instrumented, warn, Instrument};

use sengine_base::broker::{Broker, DRIP_DEAD_QUEUE, INBOX_FAILED_QUEUE, QUEUES};
use sengine_base::CoreMetrics;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
/// Depth above which a queue is considered backed up.
const DEPTH_WARN_THRESHOLD: u32 = 100;
/// Print the full table every this many samples (five minutes at 30s).
const TABLE_EVERY: u32 = 10;

/// Spawn the monitor loop.
pub fn spawn_queue_monitor(
    broker: Arc<Broker>,
    metrics: &CoreMetrics,
    shutdown: watch::Receiver<bool>,
) -> Instrumented<JoinHandle<Result<()>>> {
    let gauge = metrics.queue_depth();
    let span = info_span!("QueueMonitor");
    tokio::spawn(monitor_loop(broker, gauge, shutdown)).instrument(span)
}

fn monitored_queues() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = QUEUES.iter().map(|spec| spec.name).collect();
    names.push(INBOX_FAILED_QUEUE);
    // drip.dead is already in the declaration table; keep the list deduped.
    names.dedup();
    debug_assert!(names.contains(&DRIP_DEAD_QUEUE));
    names
}

async fn monitor_loop(
    broker: Arc<Broker>,
    gauge: IntGaugeVec,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let queues = monitored_queues();
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut samples: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("queue monitor stopping");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        if !broker.is_connected() {
            warn!("broker not connected, skipping depth sample");
            continue;
        }
        samples += 1;

        let mut depths = Vec::with_capacity(queues.len());
        for queue in &queues {
            match broker.queue_depth(queue).await {
                Ok(depth) => {
                    gauge.with_label_values(&[queue]).set(depth as i64);
                    if depth > DEPTH_WARN_THRESHOLD {
                        warn!(queue, depth, "queue depth above threshold");
                    }
                    depths.push((*queue, depth));
                }
                Err(e) => warn!(queue, error = %e, "depth probe failed"),
            }
        }

        if samples % TABLE_EVERY == 0 {
            let mut table = String::from("queue depths:\n");
            for (queue, depth) in &depths {
                let _ = writeln!(table, "  {queue:<16} {depth:>8}");
            }
            info!("{}", table.trim_end());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monitored_list_covers_both_dead_letter_queues() {
        let queues = monitored_queues();
        assert!(queues.contains(&"drip.messages"));
        assert!(queues.contains(&"drip.dead"));
        assert!(queues.contains(&"inbox.failed"));
        assert!(queues.contains(&"inbox.send"));
    }
}
