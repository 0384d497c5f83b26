use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::warn;
use reqwest::StatusCode;

use crate::config::UpstreamSettings;
use crate::ratelimit::RateLimiter;

use super::types::{Event, PriceChart, PricePoint, SseItem, TransactionsPage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSACTIONS_PAGE_LIMIT: u32 = 1000;
/// Bounded retries for a single call hitting 429, each separated by the
/// rate limiter's `2 * (1/R)` backoff, per the upstream-transient policy.
const MAX_429_RETRIES: u32 = 5;

/// Error surfaced by a failed upstream HTTP call other than a 429, which
/// callers handle themselves.
#[derive(Debug)]
pub struct UpstreamError {
    pub status: StatusCode,
    pub body: String,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream request failed: {} {}", self.status, self.body)
    }
}

impl std::error::Error for UpstreamError {}

/// Marker returned when a caller should retry after the rate limiter's
/// 429 backoff; distinguished from other `UpstreamError`s so backfill,
/// classifier, and live tail can each apply their own retry policy.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.downcast_ref::<UpstreamError>()
        .map(|e| e.status == StatusCode::TOO_MANY_REQUESTS)
        .unwrap_or(false)
}

/// Bearer-authed client for the four upstream chain-event operations,
/// paced by a shared process-wide [`RateLimiter`].
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    bearer_key: String,
    limiter: Arc<RateLimiter>,
}

impl UpstreamClient {
    pub fn new(settings: UpstreamSettings, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            bearer_key: settings.bearer_key,
            limiter,
        })
    }

    fn authed(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).bearer_auth(&self.bearer_key)
    }

    /// `GET /v2/blockchain/accounts/{address}/transactions`, newest-first by
    /// `lt`. Returns the page and the `lt` of its last element, for pagination.
    pub async fn list_transactions(
        &self,
        pool_address: &str,
        before_lt: Option<u64>,
    ) -> anyhow::Result<TransactionsPage> {
        let url = format!(
            "{}/v2/blockchain/accounts/{pool_address}/transactions",
            self.base_url
        );

        for attempt in 0..=MAX_429_RETRIES {
            self.limiter.acquire().await;

            let mut req = self
                .authed(&url)
                .query(&[("limit", TRANSACTIONS_PAGE_LIMIT.to_string())]);
            if let Some(lt) = before_lt {
                req = req.query(&[("before_lt", lt.to_string())]);
            }

            let resp = req.send().await.context("list_transactions request")?;
            if self.should_retry_429(resp.status(), &url, attempt).await {
                continue;
            }
            check_status(resp.status(), &url).await?;
            return resp.json().await.context("list_transactions decode");
        }

        unreachable!("should_retry_429 always returns false on the final attempt")
    }

    /// `GET /v2/events/{tx_hash}`. Callers treat a 404 as "event missing"
    /// (discard candidate), not a hard error.
    pub async fn fetch_event(&self, tx_hash: &str) -> anyhow::Result<Option<Event>> {
        let url = format!("{}/v2/events/{tx_hash}", self.base_url);

        for attempt in 0..=MAX_429_RETRIES {
            self.limiter.acquire().await;

            let resp = self.authed(&url).send().await.context("fetch_event request")?;
            if self.should_retry_429(resp.status(), &url, attempt).await {
                continue;
            }

            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            check_status(resp.status(), &url).await?;
            return Ok(Some(resp.json().await.context("fetch_event decode")?));
        }

        unreachable!("should_retry_429 always returns false on the final attempt")
    }

    /// `GET /v2/rates/chart` over `[start, end]` with `points` samples.
    pub async fn fetch_price_chart(
        &self,
        token: &str,
        currency: &str,
        start: i64,
        end: i64,
        points: u32,
    ) -> anyhow::Result<Vec<PricePoint>> {
        let url = format!("{}/v2/rates/chart", self.base_url);

        for attempt in 0..=MAX_429_RETRIES {
            self.limiter.acquire().await;

            let resp = self
                .authed(&url)
                .query(&[
                    ("token", token.to_string()),
                    ("currency", currency.to_string()),
                    ("start_date", start.to_string()),
                    ("end_date", end.to_string()),
                    ("points_count", points.to_string()),
                ])
                .send()
                .await
                .context("fetch_price_chart request")?;

            if self.should_retry_429(resp.status(), &url, attempt).await {
                continue;
            }
            check_status(resp.status(), &url).await?;
            let chart: PriceChart = resp.json().await.context("fetch_price_chart decode")?;
            return Ok(chart.into_points());
        }

        unreachable!("should_retry_429 always returns false on the final attempt")
    }

    /// Open the SSE subscription for `pool_address`. The caller (live tail)
    /// drives [`SseStream::next_item`] in a loop and reconnects on error.
    pub async fn subscribe(&self, pool_address: &str) -> anyhow::Result<SseStream> {
        let url = format!(
            "{}/v2/sse/accounts/transactions?accounts={pool_address}",
            self.base_url
        );

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_key)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .context("subscribe request")?;

        if resp.status() != StatusCode::OK {
            bail!(UpstreamError {
                status: resp.status(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        Ok(SseStream {
            stream: resp.bytes_stream().boxed(),
            buffer: BytesMut::new(),
        })
    }

    /// On a 429, sleep the rate limiter's `2 * (1/R)` backoff and signal the
    /// caller to retry the same call; any other status is left for
    /// `check_status` to turn into a terminal result. `attempt` is the
    /// index of the call just made, used only to stop retrying once
    /// [`MAX_429_RETRIES`] is exhausted so a persistently rate-limited
    /// upstream can't wedge a caller forever.
    async fn should_retry_429(&self, status: StatusCode, url: &str, attempt: u32) -> bool {
        if status != StatusCode::TOO_MANY_REQUESTS || attempt >= MAX_429_RETRIES {
            return false;
        }

        let delay = self.limiter.backoff_on_429();
        warn!("upstream 429 from {url}, retrying in {delay:?} (attempt {attempt})");
        tokio::time::sleep(delay).await;
        true
    }
}

async fn check_status(status: StatusCode, url: &str) -> anyhow::Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("upstream 429 from {url}");
    }
    bail!(UpstreamError {
        status,
        body: String::new(),
    });
}

/// A connected SSE stream, yielding one [`SseItem`] per `data: ` line.
pub struct SseStream {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: BytesMut,
}

impl SseStream {
    /// Read the next well-formed event line, skipping blank lines, comments,
    /// and lines that fail to parse (logged, not fatal to the subscription).
    pub async fn next_item(&mut self) -> anyhow::Result<Option<SseItem>> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                if let Some(item) = parse_sse_line(&line) {
                    return Ok(Some(item));
                }
                continue;
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e).context("SSE stream read error"),
                None => return Ok(None),
            }
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.buffer.split_to(pos + 1);
        line.truncate(line.len() - 1); // drop the '\n'
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

fn parse_sse_line(line: &str) -> Option<SseItem> {
    let payload = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    match serde_json::from_str(payload.trim()) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!("failed to parse SSE line: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_data_line() {
        let line = r#"data: {"event_id":"e1","lt":100,"timestamp":123,"account_id":"0:aa"}"#;
        let item = parse_sse_line(line).unwrap();
        assert_eq!(item.event_id, "e1");
        assert_eq!(item.lt, 100);
    }

    #[test]
    fn ignores_non_data_lines() {
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("").is_none());
    }

    #[test]
    fn ignores_malformed_json_payload() {
        assert!(parse_sse_line("data: not-json").is_none());
    }
}
