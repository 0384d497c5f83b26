//! Index rebuild: atomically clears the ordered index and repopulates it
//! from the persistent store, in descending fiat-total order.
//!
//! Runs once on cold start if the index is empty, and on a fixed schedule
//! thereafter as the consistency backstop for the aggregator's
//! best-effort, per-swap index writes.

use anyhow::Result;
use log::info;

use crate::db::index::OrderedIndex;
use crate::db::postgres::PostgresClient;

const JOB_NAME: &str = "index_rebuild";

pub async fn run(store: &PostgresClient, index: &OrderedIndex) -> Result<()> {
    info!("{JOB_NAME}: starting");
    let start = std::time::Instant::now();

    let addresses = store.get_active_addresses_by_fiat_total_desc().await?;

    index.clear().await?;
    for address in &addresses {
        index.upsert(&address.address, address.total_usd).await?;
    }

    info!(
        "{JOB_NAME}: rebuilt {} entr{} in {:?}",
        addresses.len(),
        if addresses.len() == 1 { "y" } else { "ies" },
        start.elapsed()
    );

    Ok(())
}

/// Rebuild only if the index is currently empty (the cold-start trigger).
pub async fn run_if_empty(store: &PostgresClient, index: &OrderedIndex) -> Result<()> {
    if index.card().await? == 0 {
        run(store, index).await?;
    }
    Ok(())
}
