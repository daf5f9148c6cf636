//! Engine - per-candle decision loop
//!
//! Wires the feed, indicators, regime classifier, strategy chain, advisor
//! gate, portfolio, and exit manager together. One closed candle drives
//! one tick: refresh the regime, reprice and exit open positions, then
//! hunt for a new entry. Component failures land in a bounded error log
//! and flip the reported status to Degraded; the loop itself only stops
//! on shutdown or when the feed goes away.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::advisor::{
    GateDecision, HttpSignalGate, PassthroughGate, ReviewContext, SignalGate, Verdict,
};
use crate::config::Settings;
use crate::exits::ExitManager;
use crate::feed::MarketFeed;
use crate::indicators::IndicatorEngine;
use crate::portfolio::{Position, RiskPortfolio};
use crate::regime::RegimeClassifier;
use crate::sentiment::SentimentFeed;
use crate::state::{EngineState, EngineStatus, ErrorRecord, ReviewRecord, StateWriter};
use crate::strategy::{StrategyContext, StrategyEvaluator};
use crate::types::{Candle, Direction, RegimeState, TradeSignal};

/// Candle history handed to the indicator engine each tick
const LOOKBACK_CANDLES: usize = 120;
const ERROR_LOG_CAPACITY: usize = 50;
/// Errors inside the window that flip the status to Degraded
const DEGRADED_ERROR_HIGH_WATER: usize = 10;
const DEGRADED_WINDOW_SECS: i64 = 3600;

/// Bounded log of recent component failures
struct ErrorLog {
    entries: VecDeque<ErrorRecord>,
    total: u64,
}

impl ErrorLog {
    fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(ERROR_LOG_CAPACITY),
            total: 0,
        }
    }

    fn record(&mut self, context: &str, message: impl Into<String>) {
        let message = message.into();
        warn!("{}: {}", context, message);
        if self.entries.len() == ERROR_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ErrorRecord {
            at: Utc::now(),
            context: context.to_string(),
            message,
        });
        self.total += 1;
    }

    fn count_within(&self, secs: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(secs);
        self.entries.iter().filter(|e| e.at >= cutoff).count()
    }

    fn recent(&self) -> Vec<ErrorRecord> {
        self.entries.iter().cloned().collect()
    }

    fn total(&self) -> u64 {
        self.total
    }
}

pub struct Engine {
    settings: Settings,
    feed: MarketFeed,
    indicators: IndicatorEngine,
    classifier: RegimeClassifier,
    evaluator: StrategyEvaluator,
    portfolio: RiskPortfolio,
    exits: ExitManager,
    sentiment: SentimentFeed,
    gate: Arc<dyn SignalGate>,
    state_writer: StateWriter,
    regimes: HashMap<String, RegimeState>,
    errors: ErrorLog,
    last_signal: Option<TradeSignal>,
    last_review: Option<ReviewRecord>,
    started_at: DateTime<Utc>,
    stream_was_connected: bool,
    stream_exhaustion_noted: bool,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self> {
        let feed = MarketFeed::new(settings.feed.clone())?;
        let gate: Arc<dyn SignalGate> = match &settings.advisor.url {
            Some(url) => {
                info!("External advisor gate at {}", url);
                Arc::new(HttpSignalGate::new(url.clone(), settings.advisor.timeout_secs)?)
            }
            None => {
                info!("No advisor configured, signals pass through");
                Arc::new(PassthroughGate)
            }
        };
        let sentiment = SentimentFeed::new(&settings.engine)?;
        let state_writer = StateWriter::new(&settings.engine.state_path);

        Ok(Self {
            feed,
            indicators: IndicatorEngine::new(),
            classifier: RegimeClassifier::new(),
            evaluator: StrategyEvaluator::new(settings.strategy),
            portfolio: RiskPortfolio::new(settings.risk),
            exits: ExitManager::new(settings.exits),
            sentiment,
            gate,
            state_writer,
            regimes: HashMap::new(),
            errors: ErrorLog::new(),
            last_signal: None,
            last_review: None,
            started_at: Utc::now(),
            stream_was_connected: false,
            stream_exhaustion_noted: false,
            settings,
        })
    }

    /// Run until shutdown or until the feed closes its event channel.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Engine starting: {} on {} candles, {} equity",
            self.settings.feed.symbols.join(", "),
            self.settings.feed.interval.as_str(),
            self.settings.risk.initial_capital
        );

        let mut events = self.feed.start().await;

        let mut sentiment_timer =
            interval(Duration::from_secs(self.settings.engine.sentiment_refresh_secs));
        sentiment_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut state_timer = interval(Duration::from_secs(self.settings.engine.state_write_secs));
        state_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        self.write_state(EngineStatus::Starting).await;

        loop {
            tokio::select! {
                maybe_candle = events.recv() => {
                    match maybe_candle {
                        Some(candle) => {
                            self.tick(&candle).await;
                            self.note_stream_health().await;
                        }
                        None => {
                            warn!("Market feed closed its event channel");
                            break;
                        }
                    }
                }
                _ = sentiment_timer.tick() => {
                    if let Err(e) = self.sentiment.refresh().await {
                        self.errors.record("sentiment", format!("{e:#}"));
                    }
                }
                _ = state_timer.tick() => {
                    self.note_stream_health().await;
                    let status = self.status();
                    self.write_state(status).await;
                }
                _ = &mut ctrl_c => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.feed.stop().await;
        self.write_state(EngineStatus::Stopped).await;
        info!("Engine stopped, final state written");
        Ok(())
    }

    /// One closed candle: regime, exits, then entry attempts.
    async fn tick(&mut self, candle: &Candle) {
        let symbol = candle.symbol.clone();
        let candles = self.feed.recent_candles(&symbol, LOOKBACK_CANDLES).await;
        if candles.is_empty() {
            return;
        }

        let snapshot = self.indicators.compute(&symbol, &candles);
        let price = candle.close.to_f64().unwrap_or(0.0);
        let regime = self
            .classifier
            .classify(&snapshot, self.sentiment.current(), price);
        debug!("{}: {}", symbol, regime.summary);
        self.regimes.insert(symbol.clone(), regime.clone());

        // exits run before entries so freed capacity is usable this tick
        let prices = self.feed.latest_prices().await;
        self.portfolio.mark_to_market(&prices);
        self.evaluate_exits(&prices);

        let ctx = StrategyContext::new(&symbol, &candles, &snapshot, &regime);
        for _ in 0..self.settings.strategy.max_attempts_per_tick {
            if !self.portfolio.can_open() {
                debug!("{}: no capacity for new positions", symbol);
                break;
            }
            let Some(signal) = self.evaluator.evaluate(&ctx) else {
                break;
            };
            info!(
                "Signal {} {} {} @ {} (stop {}, target {}, rr {:.2}): {}",
                signal.strategy,
                signal.direction.as_str(),
                signal.symbol,
                signal.entry,
                signal.stop_loss,
                signal.take_profit,
                signal.risk_reward,
                signal.reason
            );
            self.last_signal = Some(signal.clone());

            let decision = self.review(&signal).await;
            self.last_review = Some(ReviewRecord {
                signal_id: signal.id,
                symbol: signal.symbol.clone(),
                decision: decision.verdict.as_str().to_string(),
                confidence: decision.confidence,
                reasoning: decision.reasoning.clone(),
                decided_at: Utc::now(),
            });

            match decision.verdict {
                Verdict::Approve => {
                    let fill = self.fill_price(&signal);
                    match self.portfolio.open(&signal, fill) {
                        Some(id) => {
                            if let Some(position) = self.portfolio.position(id) {
                                self.exits.track(position);
                            }
                        }
                        None => {
                            debug!("{}: sizing declined the approved signal", symbol);
                            break;
                        }
                    }
                }
                Verdict::Reject => {
                    info!("Advisor rejected {}: {}", signal.symbol, decision.reasoning);
                    break;
                }
                Verdict::Delay { minutes } => {
                    info!(
                        "Advisor delayed {} for {} minutes: {}",
                        signal.symbol, minutes, decision.reasoning
                    );
                    break;
                }
            }
        }
    }

    fn evaluate_exits(&mut self, prices: &HashMap<String, Decimal>) {
        let open: Vec<Position> = self.portfolio.open_positions().cloned().collect();
        for position in open {
            let Some(price) = prices.get(&position.symbol).copied() else {
                continue;
            };
            let Some(reason) = self.exits.assess(&position, price) else {
                continue;
            };
            if let Some(trade) = self.portfolio.close(position.id, price, reason.as_str()) {
                self.exits.release(trade.id);
            }
        }
    }

    /// Consult the gate. When the gate itself fails the decision falls back
    /// to the configured side, rejecting unless `fail_open` is set.
    async fn review(&mut self, signal: &TradeSignal) -> GateDecision {
        let sentiment = self.sentiment.current();
        let context = ReviewContext {
            sentiment_score: sentiment.score,
            sentiment_label: sentiment.label.clone(),
            headlines: sentiment.headlines.clone(),
            regime_summary: signal.regime.summary.clone(),
        };
        let gate = Arc::clone(&self.gate);
        match gate.review(signal, &context).await {
            Ok(decision) => decision,
            Err(e) => {
                self.errors.record("advisor", format!("{e:#}"));
                if self.settings.advisor.fail_open {
                    GateDecision {
                        verdict: Verdict::Approve,
                        confidence: 0.0,
                        reasoning: "Reviewer unreachable, configured to fail open".to_string(),
                    }
                } else {
                    GateDecision {
                        verdict: Verdict::Reject,
                        confidence: 0.0,
                        reasoning: "Reviewer unreachable".to_string(),
                    }
                }
            }
        }
    }

    /// Entry slippage: a random adverse nudge up to the configured bps.
    fn fill_price(&self, signal: &TradeSignal) -> Decimal {
        let max_bps = self.settings.engine.slippage_bps;
        if max_bps == 0 {
            return signal.entry;
        }
        let bps = rand::thread_rng().gen_range(0..=max_bps);
        let adjustment = Decimal::new(bps as i64, 4);
        match signal.direction {
            Direction::Short => signal.entry * (Decimal::ONE - adjustment),
            _ => signal.entry * (Decimal::ONE + adjustment),
        }
    }

    async fn note_stream_health(&mut self) {
        let connected = self.feed.stream_connected().await;
        if self.stream_was_connected && !connected {
            self.errors
                .record("stream", "websocket lost, poll fallback active");
        }
        self.stream_was_connected = connected;

        if !self.stream_exhaustion_noted && self.feed.stream_exhausted().await {
            self.stream_exhaustion_noted = true;
            self.errors.record(
                "stream",
                "websocket reconnect attempts exhausted, running on poll fallback only",
            );
        }
    }

    fn status(&self) -> EngineStatus {
        if self.errors.count_within(DEGRADED_WINDOW_SECS) >= DEGRADED_ERROR_HIGH_WATER {
            EngineStatus::Degraded
        } else {
            EngineStatus::Running
        }
    }

    async fn write_state(&mut self, status: EngineStatus) {
        let prices = self.feed.latest_prices().await;
        let stream_connected = self.feed.stream_connected().await;
        let state = EngineState {
            status,
            started_at: self.started_at,
            generated_at: Utc::now(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            stream_connected,
            prices,
            regimes: self.regimes.clone(),
            sentiment: self.sentiment.current().clone(),
            portfolio: self.portfolio.snapshot(),
            last_signal: self.last_signal.clone(),
            last_review: self.last_review.clone(),
            recent_errors: self.errors.recent(),
            total_errors: self.errors.total(),
        };
        if let Err(e) = self.state_writer.write(&state).await {
            self.errors.record("state", format!("{e:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndicatorSnapshot, SignalStrength};
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct FailingGate;

    #[async_trait]
    impl SignalGate for FailingGate {
        async fn review(
            &self,
            _signal: &TradeSignal,
            _context: &ReviewContext,
        ) -> Result<GateDecision> {
            Err(anyhow!("gate offline"))
        }
    }

    fn fixture_signal(direction: Direction) -> TradeSignal {
        TradeSignal {
            id: uuid::Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            direction,
            strength: SignalStrength::Moderate,
            entry: Decimal::new(100, 0),
            stop_loss: Decimal::new(95, 0),
            take_profit: Decimal::new(110, 0),
            risk_reward: 2.0,
            strategy: "test".to_string(),
            reason: "fixture".to_string(),
            indicators: IndicatorSnapshot::default(),
            regime: RegimeState::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_error_log_is_bounded() {
        let mut log = ErrorLog::new();
        for i in 0..(ERROR_LOG_CAPACITY + 10) {
            log.record("test", format!("failure {i}"));
        }
        assert_eq!(log.recent().len(), ERROR_LOG_CAPACITY);
        assert_eq!(log.total(), (ERROR_LOG_CAPACITY + 10) as u64);
        // oldest entries were evicted
        assert_eq!(log.recent()[0].message, "failure 10");
    }

    #[test]
    fn test_status_degrades_past_the_high_water_mark() {
        let mut engine = Engine::new(Settings::default()).unwrap();
        assert_eq!(engine.status(), EngineStatus::Running);
        for i in 0..DEGRADED_ERROR_HIGH_WATER {
            engine.errors.record("test", format!("failure {i}"));
        }
        assert_eq!(engine.status(), EngineStatus::Degraded);
    }

    #[test]
    fn test_fill_slippage_is_adverse_and_bounded() {
        let engine = Engine::new(Settings::default()).unwrap();
        let max = Decimal::new(engine.settings.engine.slippage_bps as i64, 4);

        for _ in 0..50 {
            let long = fixture_signal(Direction::Long);
            let fill = engine.fill_price(&long);
            assert!(fill >= long.entry);
            assert!(fill <= long.entry * (Decimal::ONE + max));

            let short = fixture_signal(Direction::Short);
            let fill = engine.fill_price(&short);
            assert!(fill <= short.entry);
            assert!(fill >= short.entry * (Decimal::ONE - max));
        }
    }

    #[tokio::test]
    async fn test_gate_failure_rejects_by_default() {
        let mut engine = Engine::new(Settings::default()).unwrap();
        engine.gate = Arc::new(FailingGate);

        let decision = engine.review(&fixture_signal(Direction::Long)).await;
        assert_eq!(decision.verdict, Verdict::Reject);
        assert_eq!(engine.errors.total(), 1);
    }

    #[tokio::test]
    async fn test_gate_failure_approves_when_failing_open() {
        let mut settings = Settings::default();
        settings.advisor.fail_open = true;
        let mut engine = Engine::new(settings).unwrap();
        engine.gate = Arc::new(FailingGate);

        let decision = engine.review(&fixture_signal(Direction::Long)).await;
        assert_eq!(decision.verdict, Verdict::Approve);
        assert!((decision.confidence - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stream_exhaustion_is_recorded_once() {
        let mut settings = Settings::default();
        // nothing listens on either endpoint; the stream burns its single
        // attempt immediately and the bootstrap fails fast
        settings.feed.ws_url = "ws://127.0.0.1:9".to_string();
        settings.feed.rest_url = "http://127.0.0.1:9".to_string();
        settings.feed.bootstrap_attempts = 1;
        settings.feed.reconnect_max_attempts = 1;
        settings.feed.poll_interval_secs = 3600;

        let mut engine = Engine::new(settings).unwrap();
        let _events = engine.feed.start().await;

        for _ in 0..100 {
            if engine.feed.stream_exhausted().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(engine.feed.stream_exhausted().await);

        engine.note_stream_health().await;
        assert_eq!(engine.errors.total(), 1);
        assert_eq!(engine.errors.recent()[0].context, "stream");
        assert_eq!(engine.status(), EngineStatus::Running);

        // the give-up is a single event, not one error per health check
        engine.note_stream_health().await;
        assert_eq!(engine.errors.total(), 1);

        engine.feed.stop().await;
    }

    #[tokio::test]
    async fn test_tick_on_unknown_symbol_is_a_no_op() {
        let mut engine = Engine::new(Settings::default()).unwrap();
        let candle = crate::strategy::testkit::candle(0, 100.0, 101.0, 99.0, 100.5, 1000.0);
        engine.tick(&candle).await;
        assert!(engine.regimes.is_empty());
        assert_eq!(engine.portfolio.closed_trades().len(), 0);
    }
}
