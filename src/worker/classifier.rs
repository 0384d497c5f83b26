//! Classifier/enricher: turns a candidate transaction into
//! either a classified swap (promoted, aggregator invoked) or a discard.

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};

use crate::db::index::OrderedIndex;
use crate::db::models::{ClassifiedSwap, OperationType, Pool, Transaction};
use crate::db::postgres::PostgresClient;
use crate::upstream::{PricePoint, SwapPayload, UpstreamClient};
use crate::utils::{normalize_address, str_to_f64_with_decimals};
use crate::worker::aggregator;

const PRICE_WINDOW_SECS: i64 = 300;
const PRICE_CHART_POINTS: u32 = 10;
const NATIVE_DECIMALS: u8 = 9;
const TRACKED_ASSET_DECIMALS: u8 = 9;

/// Classify one batch of candidates, oldest-first, applying each terminal
/// outcome (promote or discard) as it is decided. Returns the number
/// promoted.
pub async fn classify_batch(
    store: &PostgresClient,
    index: &OrderedIndex,
    upstream: &UpstreamClient,
    pools_by_address: &std::collections::HashMap<String, Pool>,
    batch: &[Transaction],
) -> anyhow::Result<usize> {
    let mut promoted = 0;

    for candidate in batch {
        let Some(pool) = pools_by_address.get(&candidate.pool_id) else {
            warn!(
                "classifier: pool {} not found for candidate {}, discarding",
                candidate.pool_id, candidate.tx_hash
            );
            store.delete_candidate(&candidate.tx_hash).await?;
            continue;
        };

        match classify_one(store, index, upstream, pool, candidate).await {
            Ok(true) => promoted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "classifier: error classifying {}: {e:#}, leaving candidate for retry",
                    candidate.tx_hash
                );
            }
        }
    }

    Ok(promoted)
}

/// Classify a single candidate. Returns `Ok(true)` if promoted, `Ok(false)`
/// if discarded. Upstream errors are propagated so the caller can leave the
/// candidate for a later retry rather than discarding it on a transient
/// failure.
async fn classify_one(
    store: &PostgresClient,
    index: &OrderedIndex,
    upstream: &UpstreamClient,
    pool: &Pool,
    candidate: &Transaction,
) -> anyhow::Result<bool> {
    let event = match upstream.fetch_event(&candidate.tx_hash).await? {
        Some(event) => event,
        None => {
            debug!("classifier: no event for {}, discarding", candidate.tx_hash);
            store.delete_candidate(&candidate.tx_hash).await?;
            return Ok(false);
        }
    };

    let Some(swap) = event.swap_action() else {
        debug!("classifier: no swap action for {}, discarding", candidate.tx_hash);
        store.delete_candidate(&candidate.tx_hash).await?;
        return Ok(false);
    };

    if !swap_touches_tracked_asset(swap, &pool.tracked_asset_master) {
        debug!(
            "classifier: {} does not touch tracked asset {}, discarding",
            candidate.tx_hash, pool.tracked_asset_master
        );
        store.delete_candidate(&candidate.tx_hash).await?;
        return Ok(false);
    }

    let Some(event_timestamp) = event.timestamp else {
        debug!("classifier: {} has no event timestamp, discarding", candidate.tx_hash);
        store.delete_candidate(&candidate.tx_hash).await?;
        return Ok(false);
    };

    let Some(user_address) = swap
        .user_wallet
        .as_ref()
        .map(|w| w.address.as_str())
        .filter(|a| !a.is_empty())
    else {
        debug!("classifier: {} has no user wallet, discarding", candidate.tx_hash);
        store.delete_candidate(&candidate.tx_hash).await?;
        return Ok(false);
    };

    let user_address = match normalize_address(user_address) {
        Ok(addr) => addr,
        Err(e) => {
            warn!(
                "classifier: {} has unparseable user address {user_address}: {e:#}, discarding",
                candidate.tx_hash
            );
            store.delete_candidate(&candidate.tx_hash).await?;
            return Ok(false);
        }
    };

    let Some((operation_type, ton_amount, lambo_amount)) = decide_direction(swap) else {
        debug!(
            "classifier: {} does not match a buy or sell shape, discarding",
            candidate.tx_hash
        );
        store.delete_candidate(&candidate.tx_hash).await?;
        return Ok(false);
    };

    let timestamp = Utc
        .timestamp_opt(event_timestamp, 0)
        .single()
        .unwrap_or(candidate.timestamp);

    if let Some(event_id) = &event.event_id {
        if store.classified_event_id_exists(event_id).await? {
            debug!(
                "classifier: {} duplicates existing event_id {event_id}, discarding",
                candidate.tx_hash
            );
            store.delete_candidate(&candidate.tx_hash).await?;
            return Ok(false);
        }
    }

    if store
        .classified_identity_exists(&user_address, ton_amount, lambo_amount, timestamp)
        .await?
    {
        debug!(
            "classifier: {} duplicates an existing classified identity, discarding",
            candidate.tx_hash
        );
        store.delete_candidate(&candidate.tx_hash).await?;
        return Ok(false);
    }

    let ton_usd_price = price_at(upstream, timestamp).await?;

    let swap = ClassifiedSwap {
        user_address: user_address.clone(),
        event_id: event.event_id.clone(),
        operation_type,
        ton_amount,
        lambo_amount,
        ton_usd_price,
    };

    let applied = aggregator::apply(store, index, &candidate.tx_hash, &swap).await?;

    info!(
        "classifier: promoted {} as {} for {user_address} ({ton_amount} TON, {lambo_amount} lambo, ${:.2})",
        candidate.tx_hash, swap.operation_type.as_str(), swap.usd_amount()
    );

    Ok(applied)
}

fn swap_touches_tracked_asset(swap: &SwapPayload, tracked_asset_master: &str) -> bool {
    let tracked = match normalize_address(tracked_asset_master) {
        Ok(addr) => addr,
        Err(_) => return false,
    };

    [&swap.jetton_master_in, &swap.jetton_master_out]
        .into_iter()
        .flatten()
        .any(|r| normalize_address(&r.address).map(|a| a == tracked).unwrap_or(false))
}

/// The one and only direction policy:
/// buy/sell is decided by which side of the swap carries the native coin.
fn decide_direction(swap: &SwapPayload) -> Option<(OperationType, f64, f64)> {
    if let (Some(ton_in), Some(amount_out)) = (swap.ton_in, swap.amount_out.as_deref()) {
        if ton_in > 0 && !amount_out.is_empty() {
            let ton_amount = str_to_f64_with_decimals(&ton_in.to_string(), NATIVE_DECIMALS)?;
            let lambo_amount = str_to_f64_with_decimals(amount_out, TRACKED_ASSET_DECIMALS)?;
            if ton_amount > 0.0 && lambo_amount > 0.0 {
                return Some((OperationType::Buy, ton_amount, lambo_amount));
            }
        }
    }

    if let (Some(ton_out), Some(amount_in)) = (swap.ton_out, swap.amount_in.as_deref()) {
        if ton_out > 0 && !amount_in.is_empty() {
            let ton_amount = str_to_f64_with_decimals(&ton_out.to_string(), NATIVE_DECIMALS)?;
            let lambo_amount = str_to_f64_with_decimals(amount_in, TRACKED_ASSET_DECIMALS)?;
            if ton_amount > 0.0 && lambo_amount > 0.0 {
                return Some((OperationType::Sell, ton_amount, lambo_amount));
            }
        }
    }

    None
}

/// Fiat price lookup over `[timestamp - 300, timestamp + 300]`, closest
/// point to `timestamp`; `0.0` on an empty chart.
async fn price_at(upstream: &UpstreamClient, timestamp: DateTime<Utc>) -> anyhow::Result<f64> {
    let ts = timestamp.timestamp();
    let points = upstream
        .fetch_price_chart(
            "ton",
            "usd",
            ts - PRICE_WINDOW_SECS,
            ts + PRICE_WINDOW_SECS,
            PRICE_CHART_POINTS,
        )
        .await?;

    Ok(closest_price(&points, ts))
}

fn closest_price(points: &[PricePoint], ts: i64) -> f64 {
    points
        .iter()
        .min_by_key(|p| (p.timestamp - ts).abs())
        .map(|p| p.price)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::AddressRef;

    const TRACKED_ADDR: &str = "0:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OTHER_ADDR: &str = "0:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn swap(ton_in: Option<i64>, ton_out: Option<i64>, amount_in: Option<&str>, amount_out: Option<&str>) -> SwapPayload {
        SwapPayload {
            ton_in,
            ton_out,
            amount_in: amount_in.map(String::from),
            amount_out: amount_out.map(String::from),
            user_wallet: Some(AddressRef { address: "0:aa".into() }),
            jetton_master_in: None,
            jetton_master_out: Some(AddressRef { address: TRACKED_ADDR.into() }),
        }
    }

    #[test]
    fn buy_when_ton_in_and_amount_out_present() {
        let s = swap(Some(1_500_000_000), None, None, Some("250000000000"));
        let (op, ton, lambo) = decide_direction(&s).unwrap();
        assert_eq!(op, OperationType::Buy);
        assert_eq!(ton, 1.5);
        assert_eq!(lambo, 250.0);
    }

    #[test]
    fn sell_when_ton_out_and_amount_in_present() {
        let s = swap(None, Some(2_000_000_000), Some("100000000000"), None);
        let (op, ton, lambo) = decide_direction(&s).unwrap();
        assert_eq!(op, OperationType::Sell);
        assert_eq!(ton, 2.0);
        assert_eq!(lambo, 100.0);
    }

    #[test]
    fn neither_shape_discards() {
        let s = swap(None, None, None, None);
        assert!(decide_direction(&s).is_none());
    }

    #[test]
    fn zero_ton_in_does_not_count_as_buy() {
        let s = swap(Some(0), None, None, Some("250000000000"));
        assert!(decide_direction(&s).is_none());
    }

    #[test]
    fn swap_matches_tracked_asset_on_output_side() {
        let s = swap(Some(1_000_000_000), None, None, Some("1000000000"));
        assert!(swap_touches_tracked_asset(&s, TRACKED_ADDR));
    }

    #[test]
    fn swap_rejects_untracked_asset() {
        let s = swap(Some(1_000_000_000), None, None, Some("1000000000"));
        assert!(!swap_touches_tracked_asset(&s, OTHER_ADDR));
    }

    #[test]
    fn price_lookup_picks_closest_point() {
        let points = vec![
            PricePoint { timestamp: 90, price: 5.0 },
            PricePoint { timestamp: 100, price: 6.0 },
            PricePoint { timestamp: 110, price: 7.0 },
        ];
        assert_eq!(closest_price(&points, 101), 6.0);
    }

    #[test]
    fn price_lookup_empty_chart_is_zero() {
        assert_eq!(closest_price(&[], 100), 0.0);
    }
}
