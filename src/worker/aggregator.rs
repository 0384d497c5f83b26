//! Volume aggregator: applies one classified swap's delta to an address's
//! running totals and keeps the ordered index in step.

use log::warn;

use crate::db::index::OrderedIndex;
use crate::db::models::transaction::ClassifiedSwap;
use crate::db::postgres::PostgresClient;

/// Promote `tx_hash` to classified and fold `swap` into the address's
/// running totals, updating the ordered index to match. Returns `true` if
/// the address was known and the delta applied; `false` if the address was
/// unknown (dropped silently, the reconciler is the recovery path, not
/// this call) or the candidate was already promoted by a concurrent run.
///
/// An index write failure is logged and swallowed rather than propagated:
/// the persistent-store update already committed, and the scheduled index
/// rebuild is the backstop for a leaderboard entry that falls behind.
pub async fn apply(
    store: &PostgresClient,
    index: &OrderedIndex,
    tx_hash: &str,
    swap: &ClassifiedSwap,
) -> anyhow::Result<bool> {
    let Some(new_total) = store.promote_and_apply(tx_hash, swap).await? else {
        return Ok(false);
    };

    if let Err(e) = index.upsert(&swap.user_address, new_total).await {
        warn!(
            "aggregator: failed to update ordered index for {}: {e:#}",
            swap.user_address
        );
    }

    Ok(true)
}
