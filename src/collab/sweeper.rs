use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::router::EventRouter;

/// Spawn the periodic task that reclaims abandoned element locks. Runs for
/// the lifetime of the process; a restart starts from an empty lock table.
pub fn spawn(router: Arc<EventRouter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!("Running lock expiry sweep");
            router.sweep_expired_locks().await;
        }
    })
}
