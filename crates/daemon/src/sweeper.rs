// Periodic removal of expired edit locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::service::LockService;

/// Spawn the sweep loop. It sweeps once immediately, then every `every`,
/// until `shutdown` fires or its sender is dropped.
pub fn spawn_lock_sweeper(
    locks: Arc<dyn LockService>,
    every: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run_lock_sweeper(locks, every, shutdown))
}

pub async fn run_lock_sweeper(
    locks: Arc<dyn LockService>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match locks.sweep_locks() {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "lock sweep removed expired leases"),
                    Err(error) => warn!(?error, "lock sweep failed; retrying on next tick"),
                }
            }
            _ = shutdown.recv() => {
                debug!("lock sweeper shutting down");
                break;
            }
        }
    }
}
