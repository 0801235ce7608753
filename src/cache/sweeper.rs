//! Background TTL sweep for the response cache.
//!
//! Expired entries that are never looked up again would otherwise hold
//! budget until capacity pressure pushes them out; the sweep reclaims them
//! on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::cache::ResponseCache;

/// Spawn the periodic sweep. The task exits when `shutdown` fires.
pub fn spawn_sweeper(
    cache: Arc<ResponseCache>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval = ?interval, "Cache sweeper starting");

        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep_expired();
                    if removed == 0 {
                        tracing::debug!("Cache sweep found no expired entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_cold_entries() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(5), 1024 * 1024));
        cache.store("/cold", b"never read again");

        let shutdown = Shutdown::new();
        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(10), shutdown.subscribe());

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);

        shutdown.trigger();
        handle.await.unwrap();
    }
}
