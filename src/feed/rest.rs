//! Binance REST kline client
//!
//! Serves two callers: the startup bootstrap (historical window, retried
//! with backoff) and the low-frequency poll fallback that keeps closed
//! candles flowing when the websocket is down.

use std::str::FromStr;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::types::{Candle, FeedError, FeedResult, Interval};

/// Per-request timeout for individual API calls
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Backoff between bootstrap retries, doubled per attempt
const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 15_000;

pub struct BinanceRestClient {
    client: Client,
    base_url: String,
}

impl BinanceRestClient {
    pub fn new(base_url: &str) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| FeedError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch up to `limit` klines, oldest first. The exchange includes the
    /// currently forming candle as the last row; its close time is in the
    /// future, which is how `closed` is derived.
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> FeedResult<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval.as_str(),
            limit
        );

        let request = self.client.get(&url).send();
        let response = match tokio::time::timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            request,
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(FeedError::Api(e.to_string())),
            Err(_) => {
                return Err(FeedError::Api(format!(
                    "kline request for {} timed out after {}s",
                    symbol, REQUEST_TIMEOUT_SECS
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FeedError::Api(format!(
                "kline request for {} failed ({}): {}",
                symbol, status, text
            )));
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

        let now = Utc::now();
        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            candles.push(parse_kline_row(symbol, interval, row, now)?);
        }
        Ok(candles)
    }

    /// Bootstrap fetch with bounded exponential backoff
    pub async fn fetch_klines_retrying(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        attempts: u32,
    ) -> FeedResult<Vec<Candle>> {
        let mut delay_ms = RETRY_BASE_DELAY_MS;
        let mut last_err = FeedError::Api("no attempts configured".to_string());

        for attempt in 0..attempts.max(1) {
            match self.fetch_klines(symbol, interval, limit).await {
                Ok(candles) => return Ok(candles),
                Err(e) => {
                    warn!(
                        "Kline bootstrap for {} failed (attempt {}/{}): {}",
                        symbol,
                        attempt + 1,
                        attempts.max(1),
                        e
                    );
                    last_err = e;
                }
            }
            if attempt + 1 < attempts.max(1) {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(RETRY_MAX_DELAY_MS);
            }
        }
        Err(last_err)
    }
}

/// Parse one kline row:
/// [openTime, open, high, low, close, volume, closeTime, ...]
fn parse_kline_row(
    symbol: &str,
    interval: Interval,
    row: &[Value],
    now: chrono::DateTime<Utc>,
) -> FeedResult<Candle> {
    if row.len() < 7 {
        return Err(FeedError::InvalidResponse(format!(
            "kline row has {} fields, expected at least 7",
            row.len()
        )));
    }

    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| FeedError::InvalidResponse("kline open time is not an integer".into()))?;
    let close_ms = row[6]
        .as_i64()
        .ok_or_else(|| FeedError::InvalidResponse("kline close time is not an integer".into()))?;

    let open_time = Utc
        .timestamp_millis_opt(open_ms)
        .single()
        .ok_or_else(|| FeedError::InvalidResponse(format!("bad kline open time {}", open_ms)))?;
    let close_time = Utc
        .timestamp_millis_opt(close_ms)
        .single()
        .ok_or_else(|| FeedError::InvalidResponse(format!("bad kline close time {}", close_ms)))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        interval,
        open_time,
        close_time,
        open: parse_price(&row[1], "open")?,
        high: parse_price(&row[2], "high")?,
        low: parse_price(&row[3], "low")?,
        close: parse_price(&row[4], "close")?,
        volume: parse_price(&row[5], "volume")?,
        closed: close_time <= now,
    })
}

/// Binance encodes prices as strings
fn parse_price(value: &Value, field: &str) -> FeedResult<Decimal> {
    let raw = value
        .as_str()
        .ok_or_else(|| FeedError::InvalidResponse(format!("kline {} is not a string", field)))?;
    Decimal::from_str(raw)
        .map_err(|e| FeedError::InvalidResponse(format!("kline {} '{}': {}", field, raw, e)))
}
