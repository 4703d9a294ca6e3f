use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::outbox::{DispatchSummary, Dispatcher, OutboxStore};

/// Handle to stop and join a running poller.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Request graceful shutdown and wait for the in-flight run (if any) to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "outbox poller task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Periodic trigger for [`Dispatcher::run_once`].
///
/// Stands in for an external scheduler (cron, queue trigger). Runs never
/// overlap within one poller; overlapping pollers are safe because claiming
/// is atomic.
#[derive(Debug)]
pub struct OutboxPoller;

impl OutboxPoller {
    /// Spawn a task that dispatches every `interval` until shut down.
    ///
    /// The first run starts immediately. A run that fails to claim is logged
    /// and retried on the next tick.
    pub fn spawn<S>(dispatcher: Arc<Dispatcher<S>>, interval: Duration) -> PollerHandle
    where
        S: OutboxStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(poll_loop(dispatcher, interval, shutdown_rx));

        PollerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn poll_loop<S>(
    dispatcher: Arc<Dispatcher<S>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: OutboxStore + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "outbox poller started");

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                // Sender dropped counts as shutdown too.
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match dispatcher.run_once().await {
                    Ok(summary) => log_summary(&summary),
                    Err(err) => error!(error = %err, "outbox dispatch run failed"),
                }
            }
        }
    }

    info!("outbox poller stopped");
}

fn log_summary(summary: &DispatchSummary) {
    if summary.total > 0 {
        debug!(
            processed = summary.processed,
            failed = summary.failed,
            unrecorded = summary.unrecorded,
            deferred = summary.deferred,
            "outbox poll tick"
        );
    }
}
