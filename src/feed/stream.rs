//! Binance kline websocket task
//!
//! Owns the socket for its whole life: connect, subscribe to the kline
//! streams for every configured symbol, forward parsed candles into the
//! feed's ingest channel, and reconnect with capped exponential backoff
//! when the connection drops. A successful connection resets the failure
//! counter; exhausting the attempt budget stops the push path for good
//! (the REST poll fallback keeps closed candles flowing).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::FeedSettings;
use crate::types::{Candle, FeedError, FeedResult, Interval};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, PartialEq)]
enum StreamEnd {
    Shutdown,
    Lost,
}

pub struct KlineStream {
    url: String,
    symbols: Vec<String>,
    interval: Interval,
    reconnect_base_secs: u64,
    reconnect_max_secs: u64,
    reconnect_max_attempts: u32,
    ingest_tx: mpsc::Sender<Candle>,
    /// Shared with the feed facade so the engine can see push-path health
    connected: Arc<RwLock<bool>>,
    /// Set once when the reconnect budget runs out
    exhausted: Arc<RwLock<bool>>,
}

impl KlineStream {
    pub fn new(
        settings: &FeedSettings,
        ingest_tx: mpsc::Sender<Candle>,
        connected: Arc<RwLock<bool>>,
        exhausted: Arc<RwLock<bool>>,
    ) -> Self {
        Self {
            url: settings.ws_url.clone(),
            symbols: settings.symbols.clone(),
            interval: settings.interval,
            reconnect_base_secs: settings.reconnect_base_secs,
            reconnect_max_secs: settings.reconnect_max_secs,
            reconnect_max_attempts: settings.reconnect_max_attempts,
            ingest_tx,
            connected,
            exhausted,
        }
    }

    /// Reconnect loop; runs until shutdown or attempt exhaustion
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let max_attempts = self.reconnect_max_attempts.max(1);
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_subscribe().await {
                Ok(ws) => {
                    failures = 0;
                    *self.connected.write().await = true;
                    info!(
                        "Connected to kline stream ({} symbols @ {})",
                        self.symbols.len(),
                        self.interval.as_str()
                    );

                    let end = self.stream_messages(ws, &mut shutdown).await;
                    *self.connected.write().await = false;
                    if end == StreamEnd::Shutdown {
                        break;
                    }
                    warn!("Kline stream disconnected");
                }
                Err(e) => {
                    warn!("Kline stream connection failed: {}", e);
                }
            }

            failures += 1;
            if failures >= max_attempts {
                error!(
                    "Kline stream giving up after {} consecutive failures; \
                     poll fallback keeps the feed alive",
                    failures
                );
                *self.exhausted.write().await = true;
                return;
            }

            let delay = backoff_delay(
                failures,
                self.reconnect_base_secs,
                self.reconnect_max_secs,
            );
            debug!("Reconnecting kline stream in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        *self.connected.write().await = false;
    }

    async fn connect_and_subscribe(&self) -> FeedResult<WsStream> {
        let (mut ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| FeedError::Connection(format!("WebSocket connection failed: {}", e)))?;

        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@kline_{}", s.to_lowercase(), self.interval.as_str()))
            .collect();

        let subscribe_msg = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": streams,
            "id": 1,
        });

        ws.send(Message::Text(subscribe_msg.to_string()))
            .await
            .map_err(|e| FeedError::Connection(format!("Failed to subscribe: {}", e)))?;

        Ok(ws)
    }

    /// Read until the connection drops or shutdown is signalled
    async fn stream_messages(
        &self,
        ws: WsStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        let (mut sink, mut reader) = ws.split();

        loop {
            let msg = tokio::select! {
                msg = reader.next() => msg,
                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return StreamEnd::Shutdown;
                }
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    match parse_kline_event(&text, self.interval) {
                        Ok(Some(candle)) => {
                            if self.ingest_tx.send(candle).await.is_err() {
                                // ingest side is gone; the feed is stopping
                                return StreamEnd::Shutdown;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Failed to process kline event: {}", e),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        error!("Failed to send pong: {}", e);
                        return StreamEnd::Lost;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("WebSocket closed by server");
                    return StreamEnd::Lost;
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return StreamEnd::Lost;
                }
                None => {
                    info!("WebSocket stream ended");
                    return StreamEnd::Lost;
                }
                _ => {}
            }
        }
    }
}

fn backoff_delay(failures: u32, base_secs: u64, max_secs: u64) -> Duration {
    let shift = failures.saturating_sub(1).min(6);
    let secs = base_secs.max(1).saturating_mul(1u64 << shift).min(max_secs.max(1));
    Duration::from_secs(secs)
}

/// Parse a kline event into a candle. Non-kline frames (subscription acks,
/// other event types) yield None.
fn parse_kline_event(text: &str, expected: Interval) -> FeedResult<Option<Candle>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

    match value.get("e").and_then(|v| v.as_str()) {
        Some("kline") => {}
        Some(other) => {
            debug!("Ignoring event type: {}", other);
            return Ok(None);
        }
        None => return Ok(None),
    }

    // Kline messages have a nested "k" object
    let kline = value
        .get("k")
        .ok_or_else(|| FeedError::InvalidResponse("Missing kline data".to_string()))?;

    let interval = kline
        .get("i")
        .and_then(|v| v.as_str())
        .and_then(Interval::parse);
    if interval != Some(expected) {
        return Ok(None);
    }

    let symbol = value
        .get("s")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FeedError::InvalidResponse("Missing symbol".to_string()))?;

    let open_ms = kline
        .get("t")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| FeedError::InvalidResponse("Missing open time".to_string()))?;
    let close_ms = kline
        .get("T")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| FeedError::InvalidResponse("Missing close time".to_string()))?;

    let open_time = chrono::DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| FeedError::InvalidResponse(format!("Bad open time {}", open_ms)))?;
    let close_time = chrono::DateTime::from_timestamp_millis(close_ms)
        .ok_or_else(|| FeedError::InvalidResponse(format!("Bad close time {}", close_ms)))?;

    let is_closed = kline.get("x").and_then(|v| v.as_bool()).unwrap_or(false);

    Ok(Some(Candle {
        symbol: symbol.to_string(),
        interval: expected,
        open_time,
        close_time,
        open: parse_field(kline, "o")?,
        high: parse_field(kline, "h")?,
        low: parse_field(kline, "l")?,
        close: parse_field(kline, "c")?,
        volume: parse_field(kline, "v")?,
        closed: is_closed,
    }))
}

/// Parse directly to Decimal to avoid f64 precision loss
fn parse_field(kline: &Value, field: &str) -> FeedResult<Decimal> {
    let raw = kline
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| FeedError::InvalidResponse(format!("Missing kline field '{}'", field)))?;
    Decimal::from_str(raw)
        .map_err(|e| FeedError::InvalidResponse(format!("Invalid kline field '{}': {}", field, e)))
}
