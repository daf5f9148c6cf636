//! Market data feed
//!
//! One buffer per symbol, fed by two paths: the kline websocket (push) and
//! a low-frequency REST poll (fallback). Both paths funnel raw candles into
//! a single ingest task that owns all buffer writes, so deduplication and
//! closed-candle dispatch happen in one place. Consumers receive closed
//! candles from the channel returned by [`MarketFeed::start`] and read
//! history/prices through the accessors.

pub mod buffer;
pub mod rest;
mod stream;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FeedSettings;
use crate::types::{Candle, FeedResult};

use buffer::CandleBuffer;
use rest::BinanceRestClient;
use stream::KlineStream;

/// Raw updates buffered between the two feed paths and the ingest task
const INGEST_CHANNEL_SIZE: usize = 10_000;
/// Dispatched closed candles awaiting the consumer
const EVENT_CHANNEL_SIZE: usize = 1_024;
/// Closed candles fetched per symbol on each poll pass
const POLL_KLINE_LIMIT: usize = 2;

pub struct MarketFeed {
    settings: FeedSettings,
    rest: Arc<BinanceRestClient>,
    buffers: Arc<RwLock<HashMap<String, CandleBuffer>>>,
    stream_connected: Arc<RwLock<bool>>,
    stream_exhausted: Arc<RwLock<bool>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MarketFeed {
    pub fn new(settings: FeedSettings) -> FeedResult<Self> {
        let rest = Arc::new(BinanceRestClient::new(&settings.rest_url)?);
        let mut buffers = HashMap::new();
        for symbol in &settings.symbols {
            buffers.insert(symbol.clone(), CandleBuffer::new(settings.buffer_capacity));
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            settings,
            rest,
            buffers: Arc::new(RwLock::new(buffers)),
            stream_connected: Arc::new(RwLock::new(false)),
            stream_exhausted: Arc::new(RwLock::new(false)),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        })
    }

    /// Bootstrap history, spawn the feed tasks, and hand back the
    /// closed-candle channel. Call once.
    pub async fn start(&mut self) -> mpsc::Receiver<Candle> {
        self.bootstrap().await;

        let (ingest_tx, ingest_rx) = mpsc::channel::<Candle>(INGEST_CHANNEL_SIZE);
        let (events_tx, events_rx) = mpsc::channel::<Candle>(EVENT_CHANNEL_SIZE);

        let stream = KlineStream::new(
            &self.settings,
            ingest_tx.clone(),
            Arc::clone(&self.stream_connected),
            Arc::clone(&self.stream_exhausted),
        );
        self.tasks
            .push(tokio::spawn(stream.run(self.shutdown_rx.clone())));

        self.tasks.push(tokio::spawn(poll_loop(
            Arc::clone(&self.rest),
            self.settings.clone(),
            ingest_tx,
            self.shutdown_rx.clone(),
        )));

        self.tasks.push(tokio::spawn(ingest_loop(
            Arc::clone(&self.buffers),
            ingest_rx,
            events_tx,
            self.shutdown_rx.clone(),
        )));

        events_rx
    }

    /// Historical seed per symbol; a symbol that cannot be bootstrapped
    /// starts empty and fills from the live paths
    async fn bootstrap(&self) {
        for symbol in &self.settings.symbols {
            match self
                .rest
                .fetch_klines_retrying(
                    symbol,
                    self.settings.interval,
                    self.settings.bootstrap_candles,
                    self.settings.bootstrap_attempts,
                )
                .await
            {
                Ok(candles) => {
                    let mut buffers = self.buffers.write().await;
                    if let Some(buffer) = buffers.get_mut(symbol) {
                        buffer.seed(candles);
                        info!("Bootstrapped {} with {} candles", symbol, buffer.len());
                    }
                }
                Err(e) => {
                    warn!("Bootstrap for {} failed, starting empty: {}", symbol, e);
                }
            }
        }
    }

    /// The most recent `n` closed candles for a symbol, oldest first
    pub async fn recent_candles(&self, symbol: &str, n: usize) -> Vec<Candle> {
        let buffers = self.buffers.read().await;
        buffers.get(symbol).map(|b| b.recent(n)).unwrap_or_default()
    }

    pub async fn latest_price(&self, symbol: &str) -> Option<Decimal> {
        let buffers = self.buffers.read().await;
        buffers.get(symbol).and_then(|b| b.latest_price())
    }

    pub async fn latest_prices(&self) -> HashMap<String, Decimal> {
        let buffers = self.buffers.read().await;
        buffers
            .iter()
            .filter_map(|(symbol, buffer)| {
                buffer.latest_price().map(|p| (symbol.clone(), p))
            })
            .collect()
    }

    /// Whether the websocket push path currently has a live connection
    pub async fn stream_connected(&self) -> bool {
        *self.stream_connected.read().await
    }

    /// Whether the push path ran out of reconnect attempts for this run
    pub async fn stream_exhausted(&self) -> bool {
        *self.stream_exhausted.read().await
    }

    /// Deterministic teardown; no candle dispatches after this returns
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Market feed stopped");
    }
}

/// REST fallback: fetch the tail klines for each symbol on a fixed cadence
async fn poll_loop(
    rest: Arc<BinanceRestClient>,
    settings: FeedSettings,
    ingest_tx: mpsc::Sender<Candle>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(
        settings.poll_interval_secs.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        for symbol in &settings.symbols {
            match rest
                .fetch_klines(symbol, settings.interval, POLL_KLINE_LIMIT)
                .await
            {
                Ok(candles) => {
                    for candle in candles {
                        if ingest_tx.send(candle).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => debug!("Poll fetch for {} failed: {}", symbol, e),
            }
        }
    }
}

/// Single writer for all buffers; forwards each newly closed candle
async fn ingest_loop(
    buffers: Arc<RwLock<HashMap<String, CandleBuffer>>>,
    mut ingest_rx: mpsc::Receiver<Candle>,
    events_tx: mpsc::Sender<Candle>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let candle = tokio::select! {
            candle = ingest_rx.recv() => match candle {
                Some(c) => c,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let dispatched = {
            let mut buffers = buffers.write().await;
            match buffers.get_mut(&candle.symbol) {
                Some(buffer) => buffer.apply(candle),
                // symbols outside the configured set are not tracked
                None => None,
            }
        };

        if let Some(closed) = dispatched {
            if events_tx.send(closed).await.is_err() {
                break;
            }
        }
    }
}
