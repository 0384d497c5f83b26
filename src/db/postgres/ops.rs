use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use log::error;

use crate::db::models::{Address, OperationType, Pool, SyncStatus, Transaction};
use crate::db::postgres::PostgresClient;

/// Sanitize a string for PostgreSQL by removing null bytes (0x00), which
/// are invalid in UTF-8 text columns.
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

fn lt_to_numeric(lt: u64) -> BigDecimal {
    BigDecimal::from(lt)
}

fn numeric_to_lt(n: &BigDecimal) -> u64 {
    n.to_u64().unwrap_or(0)
}

impl PostgresClient {
    // ==================== POOLS ====================

    pub async fn get_pools(&self) -> anyhow::Result<Vec<Pool>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT address, tracked_asset_master, active, last_processed_lt, last_sync_timestamp
                FROM indexer.pools
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(row_to_pool).collect())
    }

    pub async fn get_active_pools(&self) -> anyhow::Result<Vec<Pool>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT address, tracked_asset_master, active, last_processed_lt, last_sync_timestamp
                FROM indexer.pools
                WHERE active = true
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(row_to_pool).collect())
    }

    pub async fn get_pool(&self, address: &str) -> anyhow::Result<Option<Pool>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT address, tracked_asset_master, active, last_processed_lt, last_sync_timestamp
                FROM indexer.pools
                WHERE address = $1
                "#,
                &[&address],
            )
            .await?;

        Ok(row.as_ref().map(row_to_pool))
    }

    pub async fn upsert_pool(&self, pool: &Pool) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO indexer.pools (address, tracked_asset_master, active, last_processed_lt, last_sync_timestamp)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (address) DO UPDATE SET
                    tracked_asset_master = EXCLUDED.tracked_asset_master,
                    active = EXCLUDED.active
                "#,
                &[
                    &pool.address,
                    &pool.tracked_asset_master,
                    &pool.active,
                    &lt_to_numeric(pool.last_processed_lt),
                    &pool.last_sync_timestamp,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to upsert pool {}: {:?}", pool.address, e);
                e
            })?;

        Ok(())
    }

    /// Advance a pool's checkpoint, but only if `lt` is strictly greater
    /// than the current watermark (the checkpoint only ever moves forward,
    /// a checkpoint regression is silently dropped, never an error).
    pub async fn advance_checkpoint(&self, pool_address: &str, lt: u64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE indexer.pools
                SET last_processed_lt = $2, last_sync_timestamp = now()
                WHERE address = $1 AND last_processed_lt < $2
                "#,
                &[&pool_address, &lt_to_numeric(lt)],
            )
            .await?;

        Ok(())
    }

    // ==================== TRANSACTIONS ====================

    /// Insert a candidate transaction, ignoring it if `tx_hash` already
    /// exists (both backfill and live tail rely on this for idempotency).
    pub async fn insert_candidate_if_absent(&self, tx: &Transaction) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                r#"
                INSERT INTO indexer.transactions (tx_hash, lt, timestamp, pool_id, is_processed)
                VALUES ($1, $2, $3, $4, false)
                ON CONFLICT (tx_hash) DO NOTHING
                "#,
                &[
                    &sanitize_string(&tx.tx_hash),
                    &lt_to_numeric(tx.lt),
                    &tx.timestamp,
                    &tx.pool_id,
                ],
            )
            .await?;

        Ok(inserted == 1)
    }

    pub async fn transaction_exists(&self, tx_hash: &str) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM indexer.transactions WHERE tx_hash = $1",
                &[&tx_hash],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Candidate rows, oldest-first by timestamp, up to `batch_size`, the
    /// order the classifier must consume them in.
    pub async fn get_unprocessed_batch(&self, batch_size: i64) -> anyhow::Result<Vec<Transaction>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT tx_hash, lt, timestamp, pool_id, is_processed,
                       user_address, event_id, operation_type,
                       ton_amount, lambo_amount, ton_usd_price
                FROM indexer.transactions
                WHERE is_processed = false
                ORDER BY timestamp ASC
                LIMIT $1
                "#,
                &[&batch_size],
            )
            .await?;

        Ok(rows.iter().map(row_to_transaction).collect())
    }

    pub async fn delete_candidate(&self, tx_hash: &str) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM indexer.transactions WHERE tx_hash = $1 AND is_processed = false",
                &[&tx_hash],
            )
            .await?;
        Ok(())
    }

    pub async fn classified_event_id_exists(&self, event_id: &str) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM indexer.transactions WHERE event_id = $1 AND is_processed = true",
                &[&event_id],
            )
            .await?;
        Ok(row.is_some())
    }

    pub async fn classified_identity_exists(
        &self,
        user_address: &str,
        ton_amount: f64,
        lambo_amount: f64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT 1 FROM indexer.transactions
                WHERE is_processed = true
                  AND user_address = $1 AND ton_amount = $2
                  AND lambo_amount = $3 AND timestamp = $4
                "#,
                &[&user_address, &ton_amount, &lambo_amount, &timestamp],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Promote a candidate to classified and apply its aggregator delta in
    /// one transaction so a crash between the two can never apply half a
    /// swap. Returns the address's new `total_usd` if an address row was
    /// found to apply the delta to, so the caller can update the ordered
    /// index; `None` if the candidate wasn't promoted or the address is
    /// unknown to this system (dropped silently, per the aggregator's
    /// contract).
    pub async fn promote_and_apply(
        &self,
        tx_hash: &str,
        swap: &crate::db::models::ClassifiedSwap,
    ) -> anyhow::Result<Option<f64>> {
        let mut client = self.pool.get().await?;
        let db_tx = client.transaction().await?;

        let promoted = db_tx
            .execute(
                r#"
                UPDATE indexer.transactions
                SET user_address = $2, event_id = $3, operation_type = $4,
                    ton_amount = $5, lambo_amount = $6, ton_usd_price = $7,
                    is_processed = true
                WHERE tx_hash = $1 AND is_processed = false
                "#,
                &[
                    &tx_hash,
                    &swap.user_address,
                    &swap.event_id,
                    &swap.operation_type,
                    &swap.ton_amount,
                    &swap.lambo_amount,
                    &swap.ton_usd_price,
                ],
            )
            .await?;

        if promoted != 1 {
            db_tx.rollback().await?;
            return Ok(None);
        }

        let usd_amount = swap.usd_amount();
        let new_total = apply_address_delta(
            &db_tx,
            &swap.user_address,
            swap.operation_type,
            swap.ton_amount,
            swap.lambo_amount,
            usd_amount,
        )
        .await?;

        db_tx.commit().await?;
        Ok(new_total)
    }

    // ==================== ADDRESSES ====================

    /// Addresses awaiting late-join reconciliation, oldest
    /// first so a backlog drains in registration order.
    pub async fn get_pending_addresses(&self, limit: i64) -> anyhow::Result<Vec<Address>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT address, buy_ton, sell_ton, total_ton,
                       buy_lambo, sell_lambo, total_lambo,
                       buy_usd, sell_usd, total_usd,
                       sync_status, initial_sync_completed, created_at, is_active
                FROM indexer.addresses
                WHERE sync_status = 'pending' AND is_active = true
                ORDER BY created_at ASC
                LIMIT $1
                "#,
                &[&limit],
            )
            .await?;

        Ok(rows.iter().map(row_to_address).collect())
    }

    pub async fn get_address(&self, address: &str) -> anyhow::Result<Option<Address>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT address, buy_ton, sell_ton, total_ton,
                       buy_lambo, sell_lambo, total_lambo,
                       buy_usd, sell_usd, total_usd,
                       sync_status, initial_sync_completed, created_at, is_active
                FROM indexer.addresses
                WHERE address = $1
                "#,
                &[&address],
            )
            .await?;

        Ok(row.as_ref().map(row_to_address))
    }

    pub async fn get_active_addresses_by_fiat_total_desc(&self) -> anyhow::Result<Vec<Address>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT a.address, buy_ton, sell_ton, total_ton,
                       buy_lambo, sell_lambo, total_lambo,
                       buy_usd, sell_usd, total_usd,
                       sync_status, initial_sync_completed, created_at, is_active
                FROM indexer.addresses a
                WHERE is_active = true
                  AND EXISTS (
                      SELECT 1 FROM indexer.transactions t
                      WHERE t.user_address = a.address AND t.is_processed = true
                  )
                ORDER BY total_usd DESC
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(row_to_address).collect())
    }

    pub async fn set_address_sync_status(
        &self,
        address: &str,
        status: SyncStatus,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE indexer.addresses SET sync_status = $2 WHERE address = $1",
                &[&address, &status],
            )
            .await?;
        Ok(())
    }

    /// Recompute an address's totals from scratch and mark it synced, as
    /// one transaction (the late-join reconciler's write path). Returns the
    /// recomputed `total_usd`, or `None` if the address row no longer
    /// exists (a dangling reference, dropped rather than materialized).
    pub async fn reconcile_address_totals(&self, address: &str) -> anyhow::Result<Option<f64>> {
        let mut client = self.pool.get().await?;
        let db_tx = client.transaction().await?;

        let rows = db_tx
            .query(
                r#"
                SELECT operation_type, ton_amount, lambo_amount, ton_usd_price
                FROM indexer.transactions
                WHERE user_address = $1 AND is_processed = true
                "#,
                &[&address],
            )
            .await?;

        let mut buy_ton = 0f64;
        let mut sell_ton = 0f64;
        let mut buy_lambo = 0f64;
        let mut sell_lambo = 0f64;
        let mut buy_usd = 0f64;
        let mut sell_usd = 0f64;

        for row in &rows {
            let op: OperationType = row.get("operation_type");
            let ton: f64 = row.get("ton_amount");
            let lambo: f64 = row.get("lambo_amount");
            let price: f64 = row.get("ton_usd_price");
            let usd = ton * price;

            match op {
                OperationType::Buy => {
                    buy_ton += ton;
                    buy_lambo += lambo;
                    buy_usd += usd;
                }
                OperationType::Sell => {
                    sell_ton += ton;
                    sell_lambo += lambo;
                    sell_usd += usd;
                }
            }
        }

        let row = db_tx
            .query_opt(
                r#"
                UPDATE indexer.addresses SET
                    buy_ton = $2, sell_ton = $3, total_ton = $2 + $3,
                    buy_lambo = $4, sell_lambo = $5, total_lambo = $4 + $5,
                    buy_usd = $6, sell_usd = $7, total_usd = $6 + $7,
                    sync_status = 'synced', initial_sync_completed = true
                WHERE address = $1
                RETURNING total_usd
                "#,
                &[
                    &address, &buy_ton, &sell_ton, &buy_lambo, &sell_lambo, &buy_usd, &sell_usd,
                ],
            )
            .await?;

        db_tx.commit().await?;
        Ok(row.map(|r| r.get("total_usd")))
    }
}

async fn apply_address_delta(
    db_tx: &tokio_postgres::Transaction<'_>,
    address: &str,
    operation: OperationType,
    ton_amount: f64,
    lambo_amount: f64,
    usd_amount: f64,
) -> anyhow::Result<Option<f64>> {
    let (ton_col, lambo_col, usd_col) = match operation {
        OperationType::Buy => ("buy_ton", "buy_lambo", "buy_usd"),
        OperationType::Sell => ("sell_ton", "sell_lambo", "sell_usd"),
    };

    let query = format!(
        r#"
        UPDATE indexer.addresses SET
            {ton_col} = {ton_col} + $2,
            {lambo_col} = {lambo_col} + $3,
            {usd_col} = {usd_col} + $4,
            total_ton = total_ton + $2,
            total_lambo = total_lambo + $3,
            total_usd = total_usd + $4
        WHERE address = $1
        RETURNING total_usd
        "#
    );

    let row = db_tx
        .query_opt(&query, &[&address, &ton_amount, &lambo_amount, &usd_amount])
        .await?;

    Ok(row.map(|r| r.get("total_usd")))
}

fn row_to_pool(row: &tokio_postgres::Row) -> Pool {
    let lt: BigDecimal = row.get("last_processed_lt");
    Pool {
        address: row.get("address"),
        tracked_asset_master: row.get("tracked_asset_master"),
        active: row.get("active"),
        last_processed_lt: numeric_to_lt(&lt),
        last_sync_timestamp: row.get("last_sync_timestamp"),
    }
}

fn row_to_transaction(row: &tokio_postgres::Row) -> Transaction {
    let lt: BigDecimal = row.get("lt");
    Transaction {
        tx_hash: row.get("tx_hash"),
        lt: numeric_to_lt(&lt),
        timestamp: row.get("timestamp"),
        pool_id: row.get("pool_id"),
        is_processed: row.get("is_processed"),
        user_address: row.get("user_address"),
        event_id: row.get("event_id"),
        operation_type: row.get("operation_type"),
        ton_amount: row.get("ton_amount"),
        lambo_amount: row.get("lambo_amount"),
        ton_usd_price: row.get("ton_usd_price"),
    }
}

fn row_to_address(row: &tokio_postgres::Row) -> Address {
    Address {
        address: row.get("address"),
        buy_ton: row.get("buy_ton"),
        sell_ton: row.get("sell_ton"),
        total_ton: row.get("total_ton"),
        buy_lambo: row.get("buy_lambo"),
        sell_lambo: row.get("sell_lambo"),
        total_lambo: row.get("total_lambo"),
        buy_usd: row.get("buy_usd"),
        sell_usd: row.get("sell_usd"),
        total_usd: row.get("total_usd"),
        sync_status: row.get("sync_status"),
        initial_sync_completed: row.get("initial_sync_completed"),
        created_at: row.get("created_at"),
        is_active: row.get("is_active"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lt_round_trips_through_numeric() {
        let lt = 9_876_543_210u64;
        assert_eq!(numeric_to_lt(&lt_to_numeric(lt)), lt);
    }

    #[test]
    fn sanitize_strips_null_bytes() {
        assert_eq!(sanitize_string("a\0b\0c"), "abc");
    }
}
