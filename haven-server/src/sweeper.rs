//! Background eviction sweeper.
//!
//! One perpetual task that wakes on a fixed interval, scans the session
//! store, and deletes sessions idle beyond the TTL. Runs for the life of
//! the service regardless of request traffic.

use crate::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn the eviction loop.
///
/// Sweep failures cannot escape the loop: eviction is a pure scan-and-delete
/// over the store, and per-entry decisions only compare elapsed idle time
/// against `idle_ttl`. Both durations come from configuration.
pub fn spawn(
    store: Arc<SessionStore>,
    sweep_interval: Duration,
    idle_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so sweeps start one
        // full interval after startup.
        ticker.tick().await;

        tracing::info!(
            sweep_interval_secs = sweep_interval.as_secs(),
            idle_ttl_secs = idle_ttl.as_secs(),
            "Session sweeper started"
        );

        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(idle_ttl);
            if evicted > 0 {
                tracing::info!(evicted, remaining = store.len(), "Idle session sweep finished");
            } else {
                tracing::debug!(remaining = store.len(), "Idle session sweep found nothing to evict");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_evicts_idle_sessions_on_schedule() {
        let store = Arc::new(SessionStore::new());
        let ttl = Duration::from_secs(10);

        let stale = store.get_or_create("10.0.0.5");
        stale.set_last_active_millis(Utc::now().timestamp_millis() - 60_000);
        let fresh = store.get_or_create("10.0.0.6");
        fresh.touch();

        let handle = spawn(store.clone(), Duration::from_millis(20), ttl);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!store.contains("10.0.0.5"));
        assert!(store.contains("10.0.0.6"));

        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_keeps_running_after_empty_sweeps() {
        let store = Arc::new(SessionStore::new());
        let handle = spawn(
            store.clone(),
            Duration::from_millis(10),
            Duration::from_millis(50),
        );

        // Several empty sweeps pass, then a stale session appears and is
        // still picked up by a later cycle.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let stale = store.get_or_create("10.0.0.5");
        stale.set_last_active_millis(Utc::now().timestamp_millis() - 10_000);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.contains("10.0.0.5"));

        handle.abort();
    }
}
