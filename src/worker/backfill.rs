//! Pool-centric historical backfill.
//!
//! Paginates a pool's transaction history newest-first, persisting every
//! candidate with `lt` strictly above the checkpoint (resume mode) or
//! `utime` at or after `START_DATE` (first-run mode), advancing the
//! checkpoint after each page so an interrupted run resumes higher, never
//! lower.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};

use crate::db::models::{Pool, Transaction};
use crate::db::postgres::PostgresClient;
use crate::upstream::{is_rate_limited, RawTransaction, UpstreamClient};

const PAGE_LIMIT: usize = 1000;
const COMMIT_EVERY: usize = 100;
/// Bounded retries for one page fetch, each doubling the previous delay
/// from `page_retry_delay()`. A page exhausting retries ends the run for
/// this pool without losing progress already committed; it does not
/// propagate as a run-ending error on the first failure.
const MAX_PAGE_RETRIES: u32 = 5;

/// Adaptive concurrency bookkeeping. Page fetches for a
/// single pool are a dependent chain (each page's `before_lt` cursor comes
/// from the previous page's result), so `level` bounds the page-level retry
/// concurrency rather than true parallel page fetch; RPS is still tracked
/// against the target to grow or shrink it.
struct AdaptiveConcurrency {
    level: u32,
}

impl AdaptiveConcurrency {
    fn new() -> Self {
        Self { level: 10 }
    }

    fn observe(&mut self, measured_rps: f64, target_rps: f64) {
        if measured_rps < target_rps * 0.9 && self.level < 30 {
            self.level = (self.level + 3).min(30);
        } else if measured_rps > target_rps * 1.1 && self.level > 5 {
            self.level = self.level.saturating_sub(2).max(5);
        }
    }
}

/// Run one full backfill pass for `pool`. Returns the number of candidates
/// persisted.
pub async fn run(
    store: &PostgresClient,
    upstream: &UpstreamClient,
    pool: &Pool,
    start_date: DateTime<Utc>,
    target_rps: f64,
) -> Result<usize> {
    let resume_mode = !pool.is_first_run();
    let checkpoint = pool.last_processed_lt;

    info!(
        "backfill[{}]: starting in {} mode (checkpoint={})",
        pool.address,
        if resume_mode { "resume" } else { "first-run" },
        checkpoint
    );

    let mut concurrency = AdaptiveConcurrency::new();
    let mut before_lt: Option<u64> = None;
    let mut total_inserted = 0usize;
    let mut inserted_since_commit = 0usize;
    let mut max_lt_this_run = 0u64;

    loop {
        let page_start = Instant::now();
        let page = match fetch_page_with_retry(upstream, &pool.address, before_lt).await {
            Some(page) => page,
            None => {
                warn!(
                    "backfill[{}]: page fetch exhausted retries, ending this run (checkpoint preserved)",
                    pool.address
                );
                break;
            }
        };
        let page_elapsed = page_start.elapsed().as_secs_f64().max(0.001);
        concurrency.observe(1.0 / page_elapsed, target_rps);

        if page.is_empty() {
            break;
        }

        let mut rows = page;
        rows.sort_by(|a, b| b.lt.cmp(&a.lt));

        let page_len = rows.len();
        let page_min_lt = rows.iter().map(|t| t.lt).min().unwrap_or(0);
        let page_min_utime = rows.iter().map(|t| t.utime).min().unwrap_or(0);

        for raw in &rows {
            if !in_range(resume_mode, raw.lt, raw.utime, checkpoint, start_date.timestamp()) {
                continue;
            }

            let timestamp = Utc
                .timestamp_opt(raw.utime, 0)
                .single()
                .unwrap_or_else(Utc::now);
            let candidate = Transaction::candidate(raw.hash.clone(), raw.lt, timestamp, pool.address.clone());

            if store.insert_candidate_if_absent(&candidate).await? {
                total_inserted += 1;
                inserted_since_commit += 1;
                max_lt_this_run = max_lt_this_run.max(raw.lt);
            }
        }

        if inserted_since_commit >= COMMIT_EVERY && max_lt_this_run > 0 {
            store.advance_checkpoint(&pool.address, max_lt_this_run).await?;
            inserted_since_commit = 0;
        }

        if should_stop(
            page_len,
            resume_mode,
            page_min_lt,
            page_min_utime,
            checkpoint,
            start_date.timestamp(),
        ) {
            break;
        }

        before_lt = Some(page_min_lt);
    }

    if max_lt_this_run > 0 {
        store.advance_checkpoint(&pool.address, max_lt_this_run).await?;
    }

    info!(
        "backfill[{}]: done, {total_inserted} candidate(s) persisted (concurrency level ended at {})",
        pool.address, concurrency.level
    );

    Ok(total_inserted)
}

/// The delay a failed page retries after, part of the bounded
/// backoff policy for upstream-transient errors.
pub fn page_retry_delay() -> Duration {
    Duration::from_secs(2)
}

/// Fetch one page, retrying with exponential backoff starting at
/// `page_retry_delay()` and doubling each attempt, up to
/// `MAX_PAGE_RETRIES`. A failed fetch aborts only this page, never the
/// overall run; `None` means every retry was exhausted and the caller
/// decides how to end the run.
async fn fetch_page_with_retry(
    upstream: &UpstreamClient,
    pool_address: &str,
    before_lt: Option<u64>,
) -> Option<Vec<RawTransaction>> {
    let mut delay = page_retry_delay();

    for attempt in 0..=MAX_PAGE_RETRIES {
        match upstream.list_transactions(pool_address, before_lt).await {
            Ok(page) => return Some(page.transactions),
            Err(e) => {
                if attempt == MAX_PAGE_RETRIES {
                    warn!("backfill[{pool_address}]: page fetch failed on final attempt {attempt}: {e:#}");
                    return None;
                }

                let rate_limited = is_rate_limited(&e);
                warn!(
                    "backfill[{pool_address}]: page fetch failed (attempt {attempt}{}), retrying in {delay:?}: {e:#}",
                    if rate_limited { ", rate limited" } else { "" }
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    None
}

/// Whether one raw transaction falls within the range this run should
/// persist: strictly past the checkpoint in resume mode, at or after the
/// epoch in first-run mode.
fn in_range(resume_mode: bool, lt: u64, utime: i64, checkpoint: u64, epoch: i64) -> bool {
    if resume_mode {
        lt > checkpoint
    } else {
        utime >= epoch
    }
}

/// Whether pagination should stop after this page: end of history, or the
/// page has walked entirely past the checkpoint (resume) or epoch
/// (first-run).
fn should_stop(
    page_len: usize,
    resume_mode: bool,
    page_min_lt: u64,
    page_min_utime: i64,
    checkpoint: u64,
    epoch: i64,
) -> bool {
    page_len < PAGE_LIMIT
        || (resume_mode && page_min_lt <= checkpoint)
        || (!resume_mode && page_min_utime <= epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_grows_when_under_target() {
        let mut c = AdaptiveConcurrency::new();
        c.observe(5.0, 10.0);
        assert_eq!(c.level, 13);
    }

    #[test]
    fn concurrency_shrinks_when_over_target() {
        let mut c = AdaptiveConcurrency::new();
        c.observe(15.0, 10.0);
        assert_eq!(c.level, 8);
    }

    #[test]
    fn concurrency_clamped_to_bounds() {
        let mut c = AdaptiveConcurrency { level: 29 };
        c.observe(1.0, 100.0);
        assert_eq!(c.level, 30);

        let mut c = AdaptiveConcurrency { level: 6 };
        c.observe(1000.0, 1.0);
        assert_eq!(c.level, 5);
    }

    #[test]
    fn concurrency_steady_within_target_band() {
        let mut c = AdaptiveConcurrency::new();
        c.observe(10.0, 10.0);
        assert_eq!(c.level, 10);
    }

    /// Checkpoint-advance scenario: prior checkpoint 95, pages `[120, 110]`
    /// then `[105, 100]`. All four rows are above the checkpoint and should
    /// persist; the run's high-water mark becomes 120.
    #[test]
    fn resume_mode_admits_every_lt_above_checkpoint() {
        let checkpoint = 95;
        let lts = [120u64, 110, 105, 100];
        assert!(lts.iter().all(|&lt| in_range(true, lt, 0, checkpoint, 0)));
        assert_eq!(*lts.iter().max().unwrap(), 120);
    }

    #[test]
    fn resume_mode_rejects_lt_at_or_below_checkpoint() {
        assert!(!in_range(true, 95, 0, 95, 0));
        assert!(!in_range(true, 90, 0, 95, 0));
    }

    #[test]
    fn first_run_mode_uses_epoch_not_checkpoint() {
        let epoch = 1_000;
        assert!(in_range(false, 0, 1_500, 0, epoch));
        assert!(!in_range(false, 0, 500, 0, epoch));
    }

    #[test]
    fn short_page_stops_regardless_of_checkpoint() {
        assert!(should_stop(2, true, 110, 0, 95, 0));
    }

    #[test]
    fn full_page_past_checkpoint_stops_in_resume_mode() {
        assert!(should_stop(PAGE_LIMIT, true, 90, 0, 95, 0));
        assert!(!should_stop(PAGE_LIMIT, true, 96, 0, 95, 0));
    }

    #[test]
    fn full_page_past_epoch_stops_in_first_run_mode() {
        let epoch = 1_000;
        assert!(should_stop(PAGE_LIMIT, false, 0, 900, 0, epoch));
        assert!(should_stop(PAGE_LIMIT, false, 0, epoch, 0, epoch));
        assert!(!should_stop(PAGE_LIMIT, false, 0, 1_100, 0, epoch));
    }
}
