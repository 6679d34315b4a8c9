//! Periodic cleanup of old terminal tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::manager::TaskManager;

/// Spawn the cleanup loop: every `cleanup.interval_secs`, delete
/// terminal tasks older than `cleanup.max_age_hours`.
pub fn spawn_cleanup_loop(manager: Arc<TaskManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = manager.config().cleanup.interval();
        let max_age = manager.config().cleanup.max_age();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            let deleted = manager.cleanup_old(max_age).await;
            if deleted > 0 {
                tracing::info!(deleted, "cleaned up old terminal tasks");
            }
        }
    })
}
