//! Ordered index, the leaderboard's sorted-set backing.
//!
//! A Redis sorted set keyed by `leaderboard_key`, scored by fiat total.
//! Every write is fire-and-forget from the caller's perspective: the
//! aggregator and reconciler log on failure and move on (the leaderboard
//! "Index unavailable"); the scheduled rebuild is the consistency backstop.

use anyhow::Context;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisSettings;

/// Thin wrapper over a Redis sorted set, one fixed key per leaderboard.
#[derive(Clone)]
pub struct OrderedIndex {
    conn: ConnectionManager,
    key: String,
}

impl OrderedIndex {
    pub async fn new(settings: RedisSettings) -> anyhow::Result<Self> {
        let client = redis::Client::open(settings.url).context("invalid REDIS_URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("failed to connect to Redis")?;

        Ok(Self {
            conn,
            key: settings.leaderboard_key,
        })
    }

    /// Set `address`'s score to `total_usd`, inserting it if absent.
    pub async fn upsert(&self, address: &str, total_usd: f64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(&self.key, address, total_usd).await?;
        Ok(())
    }

    pub async fn remove(&self, address: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(&self.key, address).await?;
        Ok(())
    }

    /// 0-based descending rank of `address`, or `None` if absent.
    pub async fn rank_desc(&self, address: &str) -> anyhow::Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let rank: Option<u64> = conn.zrevrank(&self.key, address).await?;
        Ok(rank)
    }

    /// `(address, total_usd)` pairs for ranks `[offset, offset + count)`, descending.
    pub async fn range_desc(&self, offset: isize, count: isize) -> anyhow::Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let stop = offset + count - 1;
        let pairs: Vec<(String, f64)> = conn
            .zrevrange_withscores(&self.key, offset, stop)
            .await?;
        Ok(pairs)
    }

    pub async fn card(&self) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let card: u64 = conn.zcard(&self.key).await?;
        Ok(card)
    }

    /// Atomically clear the index. Used only by the rebuild job, which
    /// repopulates it in the same pass.
    pub async fn clear(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}
