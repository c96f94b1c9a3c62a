//! Active Expiry
//!
//! Lazy expiry alone never frees an entry that nobody reads again. A single
//! background task wakes on a fixed period and runs
//! [`StorageEngine::cleanup_expired`], so dead entries are eventually
//! reclaimed no matter how many keys carry a deadline.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between two sweep passes
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Handle to the running sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper onto the current tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: SweepConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            "Starting expiry sweeper"
        );
        tokio::spawn(sweep_loop(engine, config.interval, shutdown_rx));

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        // The receiver is gone once the task has already exited.
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    engine: Arc<StorageEngine>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so a freshly loaded
    // store is not swept before anyone could have observed it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper stopped");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired();
        if expired > 0 {
            debug!(
                expired,
                keys_remaining = engine.len(),
                "Swept expired keys"
            );
        } else {
            trace!("Sweep found nothing to reclaim");
        }
    }
}

/// Starts the sweeper with [`DEFAULT_SWEEP_INTERVAL`].
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, SweepConfig::default())
}
