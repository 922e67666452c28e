//! Stale-node sweeper
//!
//! Periodically evicts nodes that stopped heartbeating, requeues the tasks
//! they held and drops finished task records past their retention window.

use crate::config::CoordinatorConfig;
use crate::scheduler::Scheduler;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub sweep_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub result_retention: Duration,
}

impl From<&CoordinatorConfig> for SweeperConfig {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            sweep_interval: config.sweep_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            result_retention: config.result_retention(),
        }
    }
}

/// Counters accumulated over the sweeper's lifetime.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    pub sweeps: AtomicU64,
    pub nodes_evicted: AtomicU64,
    pub tasks_requeued: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub records_purged: AtomicU64,
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(u64::try_from(by).unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Run until `shutdown_rx` flips to `true` or its sender goes away.
pub async fn sweeper_task(
    scheduler: Arc<Scheduler>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::default());

    let mut ticker = interval_at(Instant::now() + config.sweep_interval, config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_ms = config.sweep_interval.as_millis() as u64,
        heartbeat_timeout_ms = config.heartbeat_timeout.as_millis() as u64,
        "Node sweeper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let report = scheduler.sweep(config.heartbeat_timeout, config.result_retention);
                bump(&metrics.sweeps, 1);
                bump(&metrics.nodes_evicted, report.evicted.len());
                bump(&metrics.tasks_requeued, report.requeued);
                bump(&metrics.tasks_failed, report.failed);
                bump(&metrics.records_purged, report.purged);

                if report.evicted.is_empty() && report.purged == 0 {
                    tracing::trace!("Sweep found nothing to do");
                } else {
                    tracing::info!(
                        evicted = report.evicted.len(),
                        requeued = report.requeued,
                        failed = report.failed,
                        purged = report.purged,
                        "Sweep completed"
                    );
                }
            }
        }
    }

    tracing::info!(
        sweeps = metrics.sweeps.load(Ordering::Relaxed),
        nodes_evicted = metrics.nodes_evicted.load(Ordering::Relaxed),
        "Node sweeper stopped"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use xnode_core::NodeCapabilities;
    use xnode_protocol::WorkerMessage;
    use xnode_test_utils::fixtures;

    #[tokio::test(start_paused = true)]
    async fn test_evicts_silent_node_and_stops() {
        let scheduler = Arc::new(Scheduler::new(fixtures::signer(), 3));
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.handle_message(
            1,
            &tx,
            WorkerMessage::register(NodeCapabilities::default_for("n1")),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = SweeperConfig {
            sweep_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(90),
            result_retention: Duration::from_secs(3600),
        };
        let handle = tokio::spawn(sweeper_task(scheduler.clone(), config, shutdown_rx));

        tokio::time::sleep(Duration::from_secs(80)).await;
        assert!(scheduler.nodes().contains("n1"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!scheduler.nodes().contains("n1"));

        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();
        assert_eq!(metrics.nodes_evicted.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.sweeps.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_config_from_coordinator_config() {
        let config = SweeperConfig::from(&CoordinatorConfig::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(90));
    }
}
