//! Background upkeep: pool replenishment and repository cache warm-up.
//!
//! Each job runs on its own fixed interval until the shutdown token fires.
//! The first run happens immediately so a fresh process starts with a warm
//! pool and warm caches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::LedgerPool;
use crate::repo::{LedgerStore, UserStore};
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub pool_interval: Duration,
    pub cache_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        MaintenanceConfig {
            pool_interval: Duration::from_secs(300),
            cache_interval: Duration::from_secs(3600),
        }
    }
}

/// Runs `job` every `period` until `shutdown` is cancelled.
async fn run_every<F, Fut>(name: &'static str, period: Duration, shutdown: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    // A slow pass delays the next one instead of triggering a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(job = name, "Shutdown signal received, stopping maintenance job");
                break;
            }
            _ = ticker.tick() => {
                debug!(job = name, "Running maintenance job");
                job().await;
            }
        }
    }
}

pub fn spawn_pool_replenishment<S: DocumentStore>(
    pool: Arc<LedgerPool<S>>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_every("pool_replenishment", period, shutdown, move || {
        let pool = Arc::clone(&pool);
        async move {
            pool.ensure_warm().await;
        }
    }))
}

pub fn spawn_cache_warm_up<S: DocumentStore>(
    users: Arc<UserStore<S>>,
    ledgers: Arc<LedgerStore<S>>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_every("cache_warm_up", period, shutdown, move || {
        let users = Arc::clone(&users);
        let ledgers = Arc::clone(&ledgers);
        async move {
            match users.warm_up().await {
                Ok(count) => debug!(count, "Warmed user cache"),
                Err(e) => warn!(error = %e, "Warming user cache failed"),
            }
            match ledgers.warm_up().await {
                Ok(count) => debug!(count, "Warmed ledger cache"),
                Err(e) => warn!(error = %e, "Warming ledger cache failed"),
            }
        }
    }))
}
