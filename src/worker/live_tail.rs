//! Live tail: one SSE subscription per active pool.
//!
//! Persists a candidate for every item received and advances the pool's
//! checkpoint when the item's `lt` exceeds the current watermark. Coexists
//! with backfill safely: both write paths key on `tx_hash` uniqueness.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::db::models::Transaction;
use crate::db::postgres::PostgresClient;
use crate::upstream::{SseItem, SseStream, UpstreamClient};

const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// `Connecting -> Connected -> Draining -> Stopped`.
enum State {
    Connecting,
    Connected(SseStream),
    Draining,
    Stopped,
}

/// Run the live tail for `pool_address` until `cancel` fires.
pub async fn run(
    store: &PostgresClient,
    upstream: &UpstreamClient,
    pool_address: &str,
    cancel: CancellationToken,
) {
    let mut state = State::Connecting;

    loop {
        state = match state {
            State::Connecting => connect(upstream, pool_address, &cancel).await,
            State::Connected(stream) => receive(store, pool_address, stream, &cancel).await,
            State::Draining => {
                info!("live_tail[{pool_address}]: draining");
                State::Stopped
            }
            State::Stopped => {
                info!("live_tail[{pool_address}]: stopped");
                return;
            }
        };
    }
}

/// Open the SSE subscription. Returns the next state to transition to.
async fn connect(upstream: &UpstreamClient, pool_address: &str, cancel: &CancellationToken) -> State {
    if cancel.is_cancelled() {
        return State::Draining;
    }

    match upstream.subscribe(pool_address).await {
        Ok(stream) => {
            info!("live_tail[{pool_address}]: connected");
            State::Connected(stream)
        }
        Err(e) => {
            warn!("live_tail[{pool_address}]: connect failed: {e:#}");
            tokio::time::sleep(RECONNECT_DELAY).await;
            State::Connecting
        }
    }
}

/// Drive the receive loop until the stream ends, errors, or shutdown is
/// requested. Returns the next state to transition to.
async fn receive(
    store: &PostgresClient,
    pool_address: &str,
    mut stream: SseStream,
    cancel: &CancellationToken,
) -> State {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return State::Draining;
            }
            item = stream.next_item() => {
                match item {
                    Ok(Some(item)) => {
                        if let Err(e) = persist_item(store, pool_address, &item).await {
                            error!("live_tail[{pool_address}]: failed to persist item: {e:#}");
                        }
                    }
                    Ok(None) => {
                        warn!("live_tail[{pool_address}]: stream ended, reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        return State::Connecting;
                    }
                    Err(e) => {
                        warn!("live_tail[{pool_address}]: stream error: {e:#}, reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        return State::Connecting;
                    }
                }
            }
        }
    }
}

async fn persist_item(
    store: &PostgresClient,
    pool_address: &str,
    item: &SseItem,
) -> anyhow::Result<()> {
    let timestamp = Utc
        .timestamp_opt(item.timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);

    let candidate = Transaction::candidate(
        item.event_id.clone(),
        item.lt,
        timestamp,
        pool_address.to_string(),
    );

    store.insert_candidate_if_absent(&candidate).await?;
    store.advance_checkpoint(pool_address, item.lt).await?;
    Ok(())
}
