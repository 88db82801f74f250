use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

use crate::cache::CacheLayer;

/// Refreshes the channel roster and option snapshot every `period`
///
/// A failed refresh keeps the previous snapshots and is retried on the next tick.
pub fn spawn_cache_sync(
    cache: Arc<CacheLayer>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = cache.sync().await {
                        error!("Cache sync failed, keeping previous snapshots: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Cache sync stopped");
    })
}
