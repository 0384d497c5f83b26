use std::process;
use std::sync::Arc;
use std::time::Duration;

use lambotrack::config::Settings;
use lambotrack::cron::{CronScheduler, CronSettings};
use lambotrack::db::Database;
use lambotrack::db::models::Pool;
use lambotrack::ratelimit::RateLimiter;
use lambotrack::upstream::UpstreamClient;
use lambotrack::worker::{classifier, reconciler, PoolManager};
use log::{error, info, warn};
use simple_logger::SimpleLogger;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

const CLASSIFY_BATCH_INTERVAL: Duration = Duration::from_secs(2);
const RECONCILE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RECONCILE_BATCH_SIZE: i64 = 50;
/// "Store unavailable" is fatal for the affected task loop; it sleeps this
/// long before its next iteration instead of the steady-state poll interval.
const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(err) = SimpleLogger::new().init() {
        eprintln!("logger setup failed: {err}");
    }

    if let Err(err) = run().await {
        error!("fatal: {err:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::new()?;
    let db = Database::new(&settings).await?;

    seed_initial_pool(&db, &settings).await?;

    let limiter = Arc::new(RateLimiter::new(settings.upstream.requests_per_second));
    let upstream = Arc::new(UpstreamClient::new(settings.upstream.clone(), limiter)?);

    let cancel = CancellationToken::new();

    let cron = CronScheduler::new(db.postgres.clone(), db.index.clone(), CronSettings::default());
    cron.rebuild_if_empty().await?;

    let cron_token = cancel.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron.run(cron_token).await {
            error!("cron scheduler failed: {e:#}");
        }
    });

    let pools = PoolManager::new(
        db.postgres.clone(),
        upstream.clone(),
        settings.indexer.start_date,
        settings.upstream.requests_per_second as f64,
    );
    let pools_token = cancel.child_token();
    let pools_handle = tokio::spawn(async move {
        if let Err(e) = pools.run(pools_token).await {
            error!("pool manager failed: {e:#}");
        }
    });

    let classify_handle = tokio::spawn(run_classify_loop(
        db.postgres.clone(),
        db.index.clone(),
        upstream.clone(),
        cancel.child_token(),
        settings.indexer.worker_batch_size,
    ));

    let reconcile_handle = tokio::spawn(run_reconcile_loop(db.postgres.clone(), db.index.clone(), cancel.child_token()));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping...");
    cancel.cancel();

    for (name, handle) in [
        ("cron", cron_handle),
        ("pools", pools_handle),
        ("classifier", classify_handle),
        ("reconciler", reconcile_handle),
    ] {
        if let Err(e) = handle.await {
            warn!("{name} task panicked: {e:#}");
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Insert the configured seed pool if it doesn't already have a row, so a
/// brand-new deployment has somewhere for the pool manager to start.
async fn seed_initial_pool(db: &Database, settings: &Settings) -> anyhow::Result<()> {
    let address = &settings.indexer.initial_pool_address;
    if db.postgres.get_pool(address).await?.is_some() {
        return Ok(());
    }

    info!("seeding initial pool {address}");
    let pool = Pool::new(address.clone(), settings.indexer.tracked_asset_master.clone());
    db.postgres.upsert_pool(&pool).await
}

async fn run_classify_loop(
    store: Arc<lambotrack::db::PostgresClient>,
    index: Arc<lambotrack::db::OrderedIndex>,
    upstream: Arc<UpstreamClient>,
    cancel: CancellationToken,
    batch_size: usize,
) {
    let mut next_delay = CLASSIFY_BATCH_INTERVAL;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(next_delay) => {}
        }
        next_delay = CLASSIFY_BATCH_INTERVAL;

        let batch = match store.get_unprocessed_batch(batch_size as i64).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("classify loop: failed to read unprocessed batch: {e:#}, backing off");
                next_delay = STORE_ERROR_BACKOFF;
                continue;
            }
        };
        if batch.is_empty() {
            continue;
        }

        let pools = match store.get_active_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                warn!("classify loop: failed to read active pools: {e:#}, backing off");
                next_delay = STORE_ERROR_BACKOFF;
                continue;
            }
        };
        let pools_by_address = pools.into_iter().map(|p| (p.address.clone(), p)).collect();

        match classifier::classify_batch(&store, &index, &upstream, &pools_by_address, &batch).await {
            Ok(n) => {
                if n > 0 {
                    info!("classify loop: promoted {n}/{} candidate(s)", batch.len());
                }
            }
            Err(e) => {
                warn!("classify loop: batch failed: {e:#}, backing off");
                next_delay = STORE_ERROR_BACKOFF;
            }
        }
    }
}

async fn run_reconcile_loop(
    store: Arc<lambotrack::db::PostgresClient>,
    index: Arc<lambotrack::db::OrderedIndex>,
    cancel: CancellationToken,
) {
    let mut next_delay = RECONCILE_POLL_INTERVAL;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(next_delay) => {}
        }
        next_delay = RECONCILE_POLL_INTERVAL;

        match reconciler::drain_pending(&store, &index, RECONCILE_BATCH_SIZE).await {
            Ok(n) if n > 0 => info!("reconcile loop: reconciled {n} address(es)"),
            Ok(_) => {}
            Err(e) => {
                warn!("reconcile loop: failed: {e:#}, backing off");
                next_delay = STORE_ERROR_BACKOFF;
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e:#}");
            let _ = ctrl_c.await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}
