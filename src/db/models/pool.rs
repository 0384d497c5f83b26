use chrono::{DateTime, Utc};

/// A liquidity pool trading the native coin against the tracked asset.
///
/// Primary key: `address`. The checkpoint fields are the single source of
/// truth for both the pool backfill and the live tail; both write paths
/// advance `last_processed_lt` under the same monotone rule.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Pool {
    pub address: String,
    pub tracked_asset_master: String,
    pub active: bool,
    /// Largest `lt` ever persisted as a candidate for this pool, across
    /// either write path. Rendered as decimal text in storage, always
    /// compared numerically.
    pub last_processed_lt: u64,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl Pool {
    pub fn new(address: String, tracked_asset_master: String) -> Self {
        Self {
            address,
            tracked_asset_master,
            active: true,
            last_processed_lt: 0,
            last_sync_timestamp: None,
        }
    }

    /// `true` if this pool has never completed a first-run backfill pass.
    pub fn is_first_run(&self) -> bool {
        self.last_processed_lt == 0
    }
}
