//! Pool manager: one backfill-then-live-tail task per active pool,
//! generalizing the teacher's per-chain worker supervision to per-pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::models::Pool;
use crate::db::postgres::PostgresClient;
use crate::upstream::UpstreamClient;
use crate::worker::{backfill, live_tail};

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

struct RunningPool {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Starts and supervises one task per active pool: a backfill pass
/// followed by a continuing live tail, stopping pools that are deactivated
/// and starting ones newly marked active.
pub struct PoolManager {
    running: HashMap<String, RunningPool>,
    store: Arc<PostgresClient>,
    upstream: Arc<UpstreamClient>,
    start_date: DateTime<Utc>,
    target_rps: f64,
}

impl PoolManager {
    pub fn new(
        store: Arc<PostgresClient>,
        upstream: Arc<UpstreamClient>,
        start_date: DateTime<Utc>,
        target_rps: f64,
    ) -> Self {
        Self {
            running: HashMap::new(),
            store,
            upstream,
            start_date,
            target_rps,
        }
    }

    fn start_pool(&mut self, pool: Pool) {
        if self.running.contains_key(&pool.address) {
            return;
        }

        info!("pools: starting {}", pool.address);

        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let store = self.store.clone();
        let upstream = self.upstream.clone();
        let start_date = self.start_date;
        let target_rps = self.target_rps;
        let address = pool.address.clone();

        let handle = tokio::spawn(async move {
            if task_token.is_cancelled() {
                return;
            }

            match backfill::run(&store, &upstream, &pool, start_date, target_rps).await {
                Ok(n) => info!("pools[{address}]: backfill persisted {n} candidate(s)"),
                Err(e) => error!("pools[{address}]: backfill failed: {e:#}"),
            }

            live_tail::run(&store, &upstream, &address, task_token).await;
        });

        self.running.insert(pool.address.clone(), RunningPool { handle, cancel_token });
    }

    async fn stop_pool(&mut self, address: &str) {
        if let Some(running) = self.running.remove(address) {
            info!("pools: stopping {address}");
            running.cancel_token.cancel();

            if tokio::time::timeout(Duration::from_secs(10), running.handle).await.is_err() {
                warn!("pools[{address}]: did not stop within timeout, continuing");
            }
        }
    }

    async fn refresh(&mut self) -> Result<()> {
        let active = self.store.get_active_pools().await?;
        let active_addresses: std::collections::HashSet<String> =
            active.iter().map(|p| p.address.clone()).collect();

        let running_addresses: Vec<String> = self.running.keys().cloned().collect();
        for address in running_addresses {
            if !active_addresses.contains(&address) {
                self.stop_pool(&address).await;
            }
        }

        for pool in active {
            self.start_pool(pool);
        }

        Ok(())
    }

    /// Run until `cancel` fires: load active pools, start their tasks, then
    /// refresh on a fixed interval to pick up newly activated pools and
    /// stop deactivated ones.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.refresh().await?;
        info!("pools: {} pool(s) running", self.running.len());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {
                    if let Err(e) = self.refresh().await {
                        error!("pools: refresh failed: {e:#}");
                    }
                }
            }
        }

        info!("pools: shutting down all pool tasks");
        let addresses: Vec<String> = self.running.keys().cloned().collect();
        for address in addresses {
            self.stop_pool(&address).await;
        }

        Ok(())
    }
}
