//! Late-join reconciler: recomputes an address's totals from scratch when
//! it transitions into `Syncing`, the recovery path for any address the
//! aggregator couldn't find (the dangling reference it drops silently).

use log::{info, warn};

use crate::db::index::OrderedIndex;
use crate::db::models::SyncStatus;
use crate::db::postgres::PostgresClient;

/// Reconcile one address: mark it `Syncing`, recompute its totals from the
/// classified rows that name it, and write the result to the ordered
/// index. A dangling reference (no address row) is dropped without error.
pub async fn reconcile_one(store: &PostgresClient, index: &OrderedIndex, address: &str) -> anyhow::Result<()> {
    store.set_address_sync_status(address, SyncStatus::Syncing).await?;

    let Some(total_usd) = store.reconcile_address_totals(address).await? else {
        warn!("reconciler: {address} has no address row, dropping");
        return Ok(());
    };

    if let Err(e) = index.upsert(address, total_usd).await {
        warn!("reconciler: failed to update ordered index for {address}: {e:#}");
    }

    info!("reconciler: {address} reconciled, total_usd={total_usd:.2}");
    Ok(())
}

/// Drain up to `batch_size` addresses awaiting reconciliation, oldest
/// registration first. Returns the number reconciled.
pub async fn drain_pending(store: &PostgresClient, index: &OrderedIndex, batch_size: i64) -> anyhow::Result<usize> {
    let pending = store.get_pending_addresses(batch_size).await?;
    let mut reconciled = 0;

    for address in &pending {
        match reconcile_one(store, index, &address.address).await {
            Ok(()) => reconciled += 1,
            Err(e) => warn!("reconciler: failed to reconcile {}: {e:#}", address.address),
        }
    }

    Ok(reconciled)
}
