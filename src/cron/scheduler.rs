//! Cron scheduler for periodic background tasks.
//!
//! Runs one job: rebuilding the ordered index from the persistent store,
//! the consistency backstop for the aggregator's best-effort index writes.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::db::index::OrderedIndex;
use crate::db::postgres::PostgresClient;

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    store: Arc<PostgresClient>,
    index: Arc<OrderedIndex>,
    settings: Arc<CronSettings>,
}

/// Configuration for cron job intervals.
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval for the ordered index rebuild - default 6 hours.
    pub index_rebuild_interval_secs: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            index_rebuild_interval_secs: 6 * 3600,
        }
    }
}

impl CronScheduler {
    pub fn new(store: Arc<PostgresClient>, index: Arc<OrderedIndex>, settings: CronSettings) -> Self {
        Self {
            store,
            index,
            settings: Arc::new(settings),
        }
    }

    /// Rebuild the index immediately if it is empty. Call once on startup,
    /// before `run`, so a cold start never serves an empty leaderboard for
    /// a full schedule interval.
    pub async fn rebuild_if_empty(&self) -> Result<()> {
        jobs::index_rebuild::run_if_empty(&self.store, &self.index).await
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_index_rebuild_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with 1 job");

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_index_rebuild_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let store = self.store.clone();
        let index = self.index.clone();
        let interval = self.settings.index_rebuild_interval_secs;

        let job = Job::new_repeated_async(std::time::Duration::from_secs(interval), move |_uuid, _lock| {
            let store = store.clone();
            let index = index.clone();
            Box::pin(async move {
                if let Err(e) = jobs::index_rebuild::run(&store, &index).await {
                    error!("Failed to rebuild ordered index: {e:#}");
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered index_rebuild job (every {interval}s)");
        Ok(())
    }
}
